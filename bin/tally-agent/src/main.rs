use std::time::Instant;

use tally_app::prelude::*;
use tally_config::ConfigurationLoader;
use tally_core::{Pipeline, PipelineConfiguration, TagSet};
use tally_error::{ErrorContext as _, GenericError};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let started = Instant::now();

    let _guard = match initialize_logging(None) {
        Ok(guard) => guard,
        Err(e) => {
            fatal_and_exit(format!("failed to initialize logging: {}", e));
            return;
        }
    };

    match run(started).await {
        Ok(()) => info!("Tally Agent stopped."),
        Err(e) => {
            error!("{:?}", e);
            std::process::exit(1);
        }
    }
}

async fn run(started: Instant) -> Result<(), GenericError> {
    let configuration = ConfigurationLoader::default()
        .try_from_yaml("./tally.yaml")
        .from_environment("TALLY")?
        .into_generic()?;

    let pipeline_config =
        PipelineConfiguration::from_configuration(&configuration).error_context("Failed to load pipeline configuration.")?;
    let pipeline = Pipeline::new(pipeline_config).error_context("Failed to create pipeline.")?;

    let registry = pipeline.registry();
    let tags = TagSet::new();
    registry.add("tally.agent.starts", &tags, 1)?;
    registry.set("tally.agent.uptime_secs", &tags, move || started.elapsed().as_secs())?;

    pipeline.start()?;

    info!(
        init_time_ms = started.elapsed().as_millis(),
        "Pipeline running, waiting for interrupt..."
    );

    tokio::signal::ctrl_c()
        .await
        .error_context("Failed to listen for shutdown signal.")?;
    info!("Shutdown signal received. Exiting...");

    let stats = pipeline.stats();
    info!(
        sent = stats.sent,
        dropped = stats.dropped,
        restored = stats.restored,
        queued = pipeline.queue_len(),
        "Final pipeline statistics."
    );

    Ok(())
}
