use axum::{
    routing::{get, post},
    Router,
};
use tally_app::prelude::*;
use tally_error::{ErrorContext as _, GenericError};
use tokio::{net::TcpListener, sync::mpsc};
use tower_http::decompression::RequestDecompressionLayer;
use tracing::{error, info};

mod handlers;
use self::handlers::*;

mod state;
use self::state::*;

const LISTEN_ADDR_ENV_VAR: &str = "TSDB_INTAKE_LISTEN_ADDR";
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:4242";

#[tokio::main]
async fn main() {
    let _guard = match initialize_logging(None) {
        Ok(guard) => guard,
        Err(e) => {
            fatal_and_exit(format!("failed to initialize logging: {}", e));
            return;
        }
    };

    match run().await {
        Ok(()) => info!("tsdb-intake stopped."),
        Err(e) => {
            error!("{:?}", e);
            std::process::exit(1);
        }
    }
}

async fn run() -> Result<(), GenericError> {
    info!("tsdb-intake starting...");

    let listen_addr = std::env::var(LISTEN_ADDR_ENV_VAR).unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_string());

    let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
    let intake_state = IntakeState::new(shutdown_tx);

    let app = Router::new()
        // Management routes.
        .route("/shutdown", post(handle_shutdown))
        .route("/points/dump", get(handle_points_dump))
        // OpenTSDB ingestion.
        .route("/api/put", post(handle_put))
        .route_layer(RequestDecompressionLayer::new())
        .with_state(intake_state);

    let listener = TcpListener::bind(&listen_addr)
        .await
        .with_error_context(|| format!("Failed to bind to {}.", listen_addr))?;

    info!("tsdb-intake started: listening on {}", listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown_rx.recv().await.unwrap_or(()) })
        .await
        .map_err(Into::into)
}
