use std::{sync::Arc, time::Duration};

use tracing::debug;

use super::{queue::BoundedQueue, stats::StatsTracker};
use crate::{
    data_model::{TagSet, Value},
    registry::{RegistrationError, Registry},
};

/// The pipeline's own series.
///
/// Reported through the same registry as application series. When self-metrics are disabled, every method is a no-op.
#[derive(Clone)]
pub(crate) struct PipelineTelemetry {
    registry: Option<Registry>,
    tags: TagSet,
}

impl PipelineTelemetry {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry: Some(registry),
            tags: TagSet::new(),
        }
    }

    pub fn noop() -> Self {
        Self {
            registry: None,
            tags: TagSet::new(),
        }
    }

    /// Registers the gauges that report queue and stats state.
    ///
    /// The callbacks hold the queue and stats directly, never the registry, and are evaluated by the sampler after it
    /// has released the registry lock.
    pub fn register_gauges(&self, queue: &Arc<BoundedQueue>, stats: &Arc<StatsTracker>) -> Result<(), RegistrationError> {
        let Some(registry) = &self.registry else {
            return Ok(());
        };

        let dropped_stats = Arc::clone(stats);
        registry.set("collect.dropped", &self.tags, move || dropped_stats.snapshot().dropped)?;

        let sent_stats = Arc::clone(stats);
        registry.set("collect.sent", &self.tags, move || sent_stats.snapshot().sent)?;

        let queue = Arc::clone(queue);
        registry.set("collect.queued", &self.tags, move || queue.len())?;

        Ok(())
    }

    /// Records a completed request attempt, successful or not.
    pub fn post_completed(&self, elapsed: Duration) {
        self.add("collect.post.count", 1);
        self.add(
            "collect.post.total_duration",
            i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX),
        );
    }

    pub fn post_error(&self) {
        self.add("collect.post.error", 1);
    }

    pub fn post_bad_status(&self) {
        self.add("collect.post.bad_status", 1);
    }

    pub fn points_restored(&self, count: usize) {
        self.add("collect.post.restore", i64::try_from(count).unwrap_or(i64::MAX));
    }

    pub fn batch_size(&self, size: usize) {
        self.put("collect.post.batchsize", Value::from(size));
    }

    fn add(&self, metric: &str, delta: i64) {
        if let Some(registry) = &self.registry {
            if let Err(e) = registry.add(metric, &self.tags, delta) {
                debug!(error = %e, metric, "Failed to update pipeline counter.");
            }
        }
    }

    fn put(&self, metric: &str, value: Value) {
        if let Some(registry) = &self.registry {
            if let Err(e) = registry.put(metric, &self.tags, value) {
                debug!(error = %e, metric, "Failed to update pipeline gauge.");
            }
        }
    }
}
