use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use http::{
    header::{CONTENT_ENCODING, CONTENT_TYPE, USER_AGENT},
    HeaderValue, Request, StatusCode, Uri,
};
use http_body_util::{BodyExt as _, Full};
use tally_error::GenericError;
use tally_io::{
    compression::{CompressionScheme, Compressor},
    net::client::http::{HttpClient, ResetHttpClient},
};
use tokio::{
    io::AsyncWriteExt as _,
    sync::mpsc,
    time::{sleep, Instant},
};
use tracing::{debug, error, info, warn};

use super::{queue::BoundedQueue, stats::StatsTracker, telemetry::PipelineTelemetry};
use crate::{config::PipelineConfiguration, data_model::DataPoint};

static CONTENT_TYPE_JSON: HeaderValue = HeaderValue::from_static("application/json");
static USER_AGENT_TALLY: HeaderValue = HeaderValue::from_static(concat!("tally/", env!("CARGO_PKG_VERSION")));

/// What happened to a batch.
#[derive(Debug, Eq, PartialEq)]
pub(crate) enum BatchOutcome {
    /// The batch was accepted (or printed), with the given number of points.
    Sent(usize),

    /// The batch failed, and the given number of points were put back into the hand-off channel.
    Restored(usize),
}

/// Sends queued points to the endpoint in batches.
pub(crate) struct Batcher {
    queue: Arc<BoundedQueue>,
    stats: Arc<StatsTracker>,
    points_tx: mpsc::Sender<DataPoint>,
    telemetry: PipelineTelemetry,
    client: ResetHttpClient,
    endpoint: Uri,
    batch_size: usize,
    print_only: bool,
    retry_backoff: Duration,
    idle_poll_interval: Duration,
}

impl Batcher {
    /// Creates a new `Batcher`.
    ///
    /// # Errors
    ///
    /// If the configured endpoint is not valid, an error will be returned.
    pub fn new(
        config: &PipelineConfiguration, queue: Arc<BoundedQueue>, stats: Arc<StatsTracker>,
        points_tx: mpsc::Sender<DataPoint>, telemetry: PipelineTelemetry,
    ) -> Result<Self, GenericError> {
        let endpoint = config.api_put_uri()?;
        let client_builder = HttpClient::builder()
            .with_connect_timeout(config.connect_timeout())
            .with_request_timeout(config.request_timeout())
            .with_idle_conn_timeout(config.idle_conn_timeout())
            .with_max_idle_conns_per_host(config.max_idle_conns_per_host());
        let client = ResetHttpClient::new(client_builder, config.connection_reset_interval());

        Ok(Self {
            queue,
            stats,
            points_tx,
            telemetry,
            client,
            endpoint,
            batch_size: config.batch_size(),
            print_only: config.print_only(),
            retry_backoff: config.retry_backoff(),
            idle_poll_interval: config.idle_poll_interval(),
        })
    }

    pub async fn run(mut self) {
        debug!(endpoint = %self.endpoint, batch_size = self.batch_size, "Batcher started.");

        loop {
            // The queue lock is released before any network I/O happens.
            let batch = self.queue.pop_batch(self.batch_size);
            if batch.is_empty() {
                sleep(self.idle_poll_interval).await;
                continue;
            }

            match self.process_batch(batch).await {
                BatchOutcome::Sent(sent) => debug!(sent, "Batch sent."),
                BatchOutcome::Restored(restored) => {
                    debug!(restored, backoff = ?self.retry_backoff, "Backing off after failed batch.");
                    sleep(self.retry_backoff).await;
                }
            }
        }
    }

    /// Sends a single batch, restoring its points if sending fails.
    pub async fn process_batch(&mut self, batch: Vec<Bytes>) -> BatchOutcome {
        let batch_size = batch.len();

        if self.print_only {
            for entry in &batch {
                info!("{}", String::from_utf8_lossy(entry));
            }
            self.stats.record_sent(batch_size as u64);
            return BatchOutcome::Sent(batch_size);
        }

        self.telemetry.batch_size(batch_size);

        let request = match self.build_request(&batch).await {
            Ok(request) => request,
            Err(e) => {
                error!(error = %e, batch_size, "Failed to build request for batch.");
                return self.restore(batch).await;
            }
        };

        let start = Instant::now();
        let result = self.client.send(request).await;
        self.telemetry.post_completed(start.elapsed());

        match result {
            Ok(response) if response.status() == StatusCode::NO_CONTENT => {
                self.stats.record_sent(batch_size as u64);
                BatchOutcome::Sent(batch_size)
            }
            Ok(response) => {
                self.telemetry.post_bad_status();

                let status = response.status();
                match response.into_body().collect().await {
                    Ok(body) => {
                        let body = body.to_bytes();
                        let body_str = String::from_utf8_lossy(&body[..]);
                        error!(endpoint = %self.endpoint, %status, "Received unexpected response. Body: {}", body_str);
                    }
                    Err(e) => {
                        error!(endpoint = %self.endpoint, %status, error = %e, "Failed to read body of unexpected response.");
                    }
                }

                self.restore(batch).await
            }
            Err(e) => {
                self.telemetry.post_error();
                error!(endpoint = %self.endpoint, error = %e, "Failed to send batch.");

                self.restore(batch).await
            }
        }
    }

    async fn build_request(&self, batch: &[Bytes]) -> Result<Request<Full<Bytes>>, GenericError> {
        let mut compressor = Compressor::from_scheme(CompressionScheme::gzip_default(), Vec::new());

        compressor.write_all(b"[").await?;
        for (i, entry) in batch.iter().enumerate() {
            if i > 0 {
                compressor.write_all(b",").await?;
            }
            compressor.write_all(entry).await?;
        }
        compressor.write_all(b"]").await?;
        compressor.shutdown().await?;

        let builder = Request::post(self.endpoint.clone())
            .header(CONTENT_TYPE, CONTENT_TYPE_JSON.clone())
            .header(CONTENT_ENCODING, compressor.content_encoding())
            .header(USER_AGENT, USER_AGENT_TALLY.clone());

        Ok(builder.body(Full::new(Bytes::from(compressor.into_inner())))?)
    }

    /// Puts the points of a failed batch back into the hand-off channel.
    async fn restore(&self, batch: Vec<Bytes>) -> BatchOutcome {
        let mut restored = 0;
        for entry in batch {
            match serde_json::from_slice::<DataPoint>(&entry) {
                Ok(point) => {
                    if self.points_tx.send(point).await.is_err() {
                        error!("Hand-off channel closed. Remaining points in batch are lost.");
                        break;
                    }
                    restored += 1;
                }
                Err(e) => error!(error = %e, "Failed to deserialize queued data point. Skipping."),
            }
        }

        self.stats.record_restored(restored as u64);
        self.telemetry.points_restored(restored);
        warn!(restored, "Restored points from failed batch.");

        BatchOutcome::Restored(restored)
    }
}
