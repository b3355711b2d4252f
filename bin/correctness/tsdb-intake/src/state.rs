use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tally_core::DataPoint;
use tokio::sync::mpsc;

#[derive(Clone)]
pub struct IntakeState {
    shutdown_tx: mpsc::Sender<()>,
    points: Arc<Mutex<Vec<DataPoint>>>,
}

impl IntakeState {
    /// Creates a new `IntakeState` with the given shutdown trigger.
    pub fn new(shutdown_tx: mpsc::Sender<()>) -> Self {
        Self {
            shutdown_tx,
            points: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn points(&self) -> MutexGuard<'_, Vec<DataPoint>> {
        self.points.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Dumps every point received so far.
    pub fn dump_points(&self) -> Vec<DataPoint> {
        self.points().clone()
    }

    /// Triggers shutdown of the intake server.
    pub fn trigger_shutdown(&self) {
        // A full channel means shutdown was already triggered.
        let _ = self.shutdown_tx.try_send(());
    }

    /// Stores a batch of received points.
    pub fn merge_points(&self, points: Vec<DataPoint>) {
        self.points().extend(points);
    }
}
