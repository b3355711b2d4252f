//! Sampling, queueing, and shipping.
//!
//! A pipeline runs three long-lived tasks:
//!
//! - the sampler, which turns every registered series into a data point on a fixed interval
//! - the enqueuer, which serializes data points into a bounded queue, dropping them when the queue is full
//! - the batcher, which sends the queue contents to the endpoint in batches
//!
//! Points from batches that fail to send are put back into the channel between the sampler and the enqueuer, so they
//! are queued again behind newer points.
//!
//! The registry, the queue, and the stats are each guarded by their own lock, and no lock is ever acquired while
//! another is held.

use std::sync::{Arc, Mutex, PoisonError};

use tally_error::{generic_error, ErrorContext as _, GenericError};
use tokio::{runtime::Handle, sync::mpsc};
use tracing::{info, info_span, Instrument as _};

use crate::{config::PipelineConfiguration, data_model::DataPoint, registry::Registry};

mod batcher;
use self::batcher::Batcher;

mod enqueuer;
use self::enqueuer::Enqueuer;

mod queue;
use self::queue::BoundedQueue;

mod sampler;
use self::sampler::Sampler;

mod stats;
pub use self::stats::PipelineStats;
use self::stats::StatsTracker;

mod telemetry;
use self::telemetry::PipelineTelemetry;

#[cfg(test)]
mod test_intake;

/// A telemetry pipeline.
///
/// Owns the registry that series are registered with, along with everything needed to sample them and ship the
/// resulting data points. Nothing is sampled or sent until [`start`][Self::start] is called.
pub struct Pipeline {
    config: PipelineConfiguration,
    registry: Registry,
    queue: Arc<BoundedQueue>,
    stats: Arc<StatsTracker>,
    telemetry: PipelineTelemetry,
    points_tx: mpsc::Sender<DataPoint>,
    points_rx: Mutex<Option<mpsc::Receiver<DataPoint>>>,
}

impl Pipeline {
    /// Creates a new `Pipeline` from the given configuration.
    ///
    /// Unless disabled, the pipeline's own series are registered here, which resolves the local hostname if no
    /// hostname was configured. A configured hostname that is empty disables the `host` tag instead.
    ///
    /// # Errors
    ///
    /// If the configuration is invalid, or the pipeline's own series could not be registered, an error will be
    /// returned.
    pub fn new(config: PipelineConfiguration) -> Result<Self, GenericError> {
        config.validate()?;
        config.api_put_uri()?;

        let registry = match config.hostname() {
            Some(hostname) => Registry::with_hostname(hostname),
            None => Registry::new(),
        };
        let queue = Arc::new(BoundedQueue::new(config.max_queue_len()));
        let stats = Arc::new(StatsTracker::default());
        let (points_tx, points_rx) = mpsc::channel(config.handoff_channel_capacity());

        let telemetry = if config.self_metrics_disabled() {
            PipelineTelemetry::noop()
        } else {
            PipelineTelemetry::new(registry.clone())
        };
        telemetry
            .register_gauges(&queue, &stats)
            .error_context("Failed to register pipeline metrics.")?;

        Ok(Self {
            config,
            registry,
            queue,
            stats,
            telemetry,
            points_tx,
            points_rx: Mutex::new(Some(points_rx)),
        })
    }

    /// Returns the registry that series should be registered with.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Returns a snapshot of the pipeline statistics.
    pub fn stats(&self) -> PipelineStats {
        self.stats.snapshot()
    }

    /// Returns the number of points currently waiting in the queue.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Starts the sampler, enqueuer, and batcher tasks.
    ///
    /// Must be called from within a Tokio runtime. The tasks run until the runtime shuts down.
    ///
    /// # Errors
    ///
    /// If no Tokio runtime is available, or the pipeline was already started, an error will be returned.
    pub fn start(&self) -> Result<(), GenericError> {
        let handle = Handle::try_current().error_context("Pipeline must be started from within a Tokio runtime.")?;
        let (sampler, enqueuer, batcher) = self.build_workers()?;

        handle.spawn(sampler.run().instrument(info_span!("sampler")));
        handle.spawn(enqueuer.run().instrument(info_span!("enqueuer")));
        handle.spawn(batcher.run().instrument(info_span!("batcher")));

        info!(
            sample_interval = ?self.config.sample_interval(),
            max_queue_len = self.config.max_queue_len(),
            batch_size = self.config.batch_size(),
            print_only = self.config.print_only(),
            "Pipeline started."
        );

        Ok(())
    }

    fn build_workers(&self) -> Result<(Sampler, Enqueuer, Batcher), GenericError> {
        // Build everything fallible before taking the receiver, so a failure here leaves the pipeline startable.
        let batcher = Batcher::new(
            &self.config,
            Arc::clone(&self.queue),
            Arc::clone(&self.stats),
            self.points_tx.clone(),
            self.telemetry.clone(),
        )?;

        let points_rx = self
            .points_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| generic_error!("Pipeline has already been started."))?;

        let sampler = Sampler::new(
            self.registry.clone(),
            self.points_tx.clone(),
            self.config.sample_interval(),
            self.config.metric_root().map(String::from),
        );
        let enqueuer = Enqueuer::new(Arc::clone(&self.queue), Arc::clone(&self.stats), points_rx);

        Ok((sampler, enqueuer, batcher))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use http::StatusCode;

    use super::{batcher::BatchOutcome, test_intake::TestIntake, *};
    use crate::data_model::{TagSet, Value};

    fn config(intake: &TestIntake) -> PipelineConfiguration {
        PipelineConfiguration::default()
            .with_endpoint(intake.endpoint())
            .with_hostname("test-host")
            .with_sample_interval_secs(1)
            .with_retry_backoff_ms(10)
            .with_idle_poll_interval_ms(10)
    }

    fn point(i: i64) -> DataPoint {
        DataPoint::new("e2e.metric", 1_700_000_000, i, TagSet::from([("host", "test-host")]))
    }

    #[test]
    fn invalid_configuration_is_rejected() {
        let base = PipelineConfiguration::default().with_hostname("test-host");

        assert!(Pipeline::new(base.clone().with_batch_size(0)).is_err());
        assert!(Pipeline::new(base.clone().with_max_queue_len(0)).is_err());
        assert!(Pipeline::new(base.clone().with_endpoint("::not a url::")).is_err());
        assert!(Pipeline::new(base.clone().with_metric_root("bad root")).is_err());
        assert!(Pipeline::new(base).is_ok());
    }

    #[test]
    fn self_metrics_are_registered_unless_disabled() {
        let base = PipelineConfiguration::default().with_hostname("test-host");

        let pipeline = Pipeline::new(base.clone()).unwrap();
        assert_eq!(pipeline.registry().len(), 3);

        let pipeline = Pipeline::new(base.with_self_metrics_disabled(true)).unwrap();
        assert!(pipeline.registry().is_empty());
    }

    #[test]
    fn https_endpoint_is_accepted() {
        let config = PipelineConfiguration::default()
            .with_hostname("test-host")
            .with_endpoint("https://tsdb.example.com");
        assert!(Pipeline::new(config).is_ok());
    }

    #[test]
    fn empty_hostname_disables_host_tag() {
        let pipeline = Pipeline::new(PipelineConfiguration::default().with_hostname("")).unwrap();
        pipeline.registry().add("requests", &TagSet::new(), 1).unwrap();

        let snapshot = pipeline.registry().snapshot();
        assert_eq!(snapshot.gauges.len(), 3);
        assert!(snapshot.gauges.iter().all(|gauge| gauge.tags.is_empty()));
        assert!(snapshot.counters[0].tags.is_empty());
    }

    #[tokio::test]
    async fn batcher_task_is_spawnable() {
        fn assert_send<T: Send + 'static>(_: &T) {}

        let intake = TestIntake::spawn(StatusCode::NO_CONTENT).await;
        let pipeline = Pipeline::new(config(&intake)).unwrap();
        let (sampler, enqueuer, batcher) = pipeline.build_workers().unwrap();

        assert_send(&sampler.run());
        assert_send(&enqueuer.run());
        assert_send(&batcher.run());
    }

    #[test]
    fn start_requires_runtime() {
        let pipeline = Pipeline::new(PipelineConfiguration::default().with_hostname("test-host")).unwrap();
        assert!(pipeline.start().is_err());
    }

    #[tokio::test]
    async fn start_twice_is_an_error() {
        let intake = TestIntake::spawn(StatusCode::NO_CONTENT).await;
        let pipeline = Pipeline::new(config(&intake)).unwrap();

        pipeline.start().unwrap();
        assert!(pipeline.start().is_err());
    }

    #[tokio::test]
    async fn full_queue_and_failing_endpoint() {
        let intake = TestIntake::spawn(StatusCode::INTERNAL_SERVER_ERROR).await;
        let pipeline = Pipeline::new(
            config(&intake)
                .with_max_queue_len(2)
                .with_batch_size(1)
                .with_self_metrics_disabled(true),
        )
        .unwrap();
        let (_sampler, mut enqueuer, mut batcher) = pipeline.build_workers().unwrap();

        // Three points arrive with nothing draining the queue.
        let points = vec![point(1), point(2), point(3)];
        for point in &points {
            pipeline.points_tx.try_send(point.clone()).unwrap();
        }
        assert!(enqueuer.enqueue_next().await);
        assert_eq!(pipeline.queue_len(), 2);
        assert_eq!(pipeline.stats().dropped, 1);

        // Every send fails, so each single-point batch is restored.
        for _ in 0..2 {
            let batch = pipeline.queue.pop_batch(1);
            assert_eq!(batch.len(), 1);
            assert_eq!(batcher.process_batch(batch).await, BatchOutcome::Restored(1));
        }
        assert_eq!(pipeline.queue_len(), 0);
        assert_eq!(pipeline.stats().restored, 2);

        // The restored points come back through the enqueuer.
        assert!(enqueuer.enqueue_next().await);
        assert_eq!(pipeline.queue_len(), 2);

        let requeued: Vec<DataPoint> = pipeline
            .queue
            .pop_batch(2)
            .iter()
            .map(|entry| serde_json::from_slice(entry).unwrap())
            .collect();
        assert_eq!(requeued, points[..2]);
    }

    #[tokio::test]
    async fn registered_series_reach_the_endpoint() {
        let intake = TestIntake::spawn(StatusCode::NO_CONTENT).await;
        let pipeline = Pipeline::new(config(&intake).with_metric_root("app")).unwrap();

        pipeline.registry().add("requests", &TagSet::new(), 3).unwrap();
        pipeline.start().unwrap();

        // One counter plus three pipeline gauges are sampled on the first tick.
        let points = intake.wait_for_points(4).await;
        let requests = points.iter().find(|point| point.metric() == "app.requests").unwrap();
        assert_eq!(requests.value(), Value::Integer(3));
        assert_eq!(requests.tags(), &TagSet::from([("host", "test-host")]));
        assert!(points.iter().any(|point| point.metric() == "app.collect.queued"));
    }

    #[tokio::test]
    async fn points_are_delivered_once_endpoint_recovers() {
        let intake = TestIntake::spawn(StatusCode::SERVICE_UNAVAILABLE).await;
        let pipeline = Pipeline::new(config(&intake).with_self_metrics_disabled(true)).unwrap();

        pipeline.registry().put("one.shot", &TagSet::new(), 7).unwrap();
        pipeline.start().unwrap();

        tokio::time::timeout(Duration::from_secs(10), async {
            while pipeline.stats().restored == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        intake.set_status(StatusCode::NO_CONTENT);

        let points = intake.wait_for_points(1).await;
        assert_eq!(points[0].metric(), "one.shot");
        assert_eq!(points[0].value(), Value::Integer(7));
    }
}
