use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, error};

use super::{queue::BoundedQueue, stats::StatsTracker};
use crate::data_model::DataPoint;

/// Moves data points from the hand-off channel into the queue.
pub(crate) struct Enqueuer {
    queue: Arc<BoundedQueue>,
    stats: Arc<StatsTracker>,
    points_rx: mpsc::Receiver<DataPoint>,
}

impl Enqueuer {
    pub fn new(queue: Arc<BoundedQueue>, stats: Arc<StatsTracker>, points_rx: mpsc::Receiver<DataPoint>) -> Self {
        Self {
            queue,
            stats,
            points_rx,
        }
    }

    pub async fn run(mut self) {
        while self.enqueue_next().await {}

        debug!("Hand-off channel closed. Enqueuer stopping.");
    }

    /// Waits for the next point, then enqueues it along with every point already waiting behind it.
    ///
    /// Returns `false` once the hand-off channel is closed.
    pub async fn enqueue_next(&mut self) -> bool {
        match self.points_rx.recv().await {
            Some(point) => {
                self.enqueue_available(point);
                true
            }
            None => false,
        }
    }

    /// Enqueues `first` along with every point already waiting in the channel.
    ///
    /// All points are handled under a single acquisition of the queue lock. Points arriving while the queue is full are
    /// dropped without being serialized.
    pub fn enqueue_available(&mut self, first: DataPoint) {
        let mut dropped = 0;
        let mut serialize_failures = 0;

        {
            let mut entries = self.queue.lock();
            let mut next = Some(first);
            while let Some(point) = next {
                if entries.len() >= self.queue.max_len() {
                    dropped += 1;
                } else {
                    match serde_json::to_vec(&point) {
                        Ok(entry) => entries.push_back(Bytes::from(entry)),
                        Err(e) => {
                            error!(error = %e, metric = point.metric(), "Failed to serialize data point. Dropping.");
                            serialize_failures += 1;
                        }
                    }
                }

                next = self.points_rx.try_recv().ok();
            }
        }

        // Stats are updated only after the queue lock is released.
        if dropped > 0 {
            self.stats.record_dropped(dropped);
        }
        if serialize_failures > 0 {
            self.stats.record_serialize_failures(serialize_failures);
        }
    }
}
