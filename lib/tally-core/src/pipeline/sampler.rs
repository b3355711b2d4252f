use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    time::Duration,
};

use tokio::{
    sync::mpsc,
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, error};

use crate::{data_model::DataPoint, registry::Registry};

/// Periodically turns every registered series into a data point.
pub(crate) struct Sampler {
    registry: Registry,
    points_tx: mpsc::Sender<DataPoint>,
    interval: Duration,
    metric_root: Option<String>,
}

impl Sampler {
    pub fn new(
        registry: Registry, points_tx: mpsc::Sender<DataPoint>, interval: Duration, metric_root: Option<String>,
    ) -> Self {
        Self {
            registry,
            points_tx,
            interval,
            metric_root,
        }
    }

    pub async fn run(self) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let points = self.sample(chrono::Utc::now().timestamp());
            debug!(points = points.len(), "Sampled registry.");

            for point in points {
                // Waiting here is what throttles sampling when the queue side falls behind.
                if self.points_tx.send(point).await.is_err() {
                    debug!("Hand-off channel closed. Sampler stopping.");
                    return;
                }
            }
        }
    }

    /// Builds one data point per registered series, clearing pending put gauges.
    ///
    /// The registry lock is only held while copying the series out. Callback gauges are evaluated afterwards, and a
    /// callback that panics is skipped for this tick.
    pub fn sample(&self, timestamp: i64) -> Vec<DataPoint> {
        let snapshot = self.registry.snapshot();
        let mut points = Vec::with_capacity(snapshot.counters.len() + snapshot.gauges.len() + snapshot.puts.len());

        for counter in snapshot.counters {
            points.push(DataPoint::new(
                self.metric_name(&counter.metric),
                timestamp,
                counter.value,
                counter.tags,
            ));
        }

        for gauge in snapshot.gauges {
            match catch_unwind(AssertUnwindSafe(|| (gauge.value)())) {
                Ok(value) => points.push(DataPoint::new(self.metric_name(&gauge.metric), timestamp, value, gauge.tags)),
                Err(_) => error!(
                    metric = %gauge.metric,
                    tags = %gauge.tags,
                    "Gauge callback panicked. Skipping series for this interval."
                ),
            }
        }

        for put in snapshot.puts {
            points.push(DataPoint::new(self.metric_name(&put.metric), timestamp, put.value, put.tags));
        }

        points
    }

    fn metric_name(&self, metric: &str) -> String {
        match &self.metric_root {
            Some(root) => format!("{}.{}", root, metric),
            None => metric.to_string(),
        }
    }
}
