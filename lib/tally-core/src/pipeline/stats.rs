use std::sync::{Mutex, MutexGuard, PoisonError};

/// Pipeline statistics.
///
/// All counts only ever increase.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PipelineStats {
    /// Points discarded because the queue was full.
    pub dropped: u64,

    /// Points accepted by the endpoint (or printed, in print-only mode).
    pub sent: u64,

    /// Points put back into the pipeline after a failed request.
    pub restored: u64,

    /// Points discarded because they could not be serialized.
    pub serialize_failures: u64,
}

/// Shared, lock-protected [`PipelineStats`].
#[derive(Default)]
pub(crate) struct StatsTracker {
    inner: Mutex<PipelineStats>,
}

impl StatsTracker {
    fn lock(&self) -> MutexGuard<'_, PipelineStats> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> PipelineStats {
        *self.lock()
    }

    pub fn record_dropped(&self, count: u64) {
        self.lock().dropped += count;
    }

    pub fn record_sent(&self, count: u64) {
        self.lock().sent += count;
    }

    pub fn record_restored(&self, count: u64) {
        self.lock().restored += count;
    }

    pub fn record_serialize_failures(&self, count: u64) {
        self.lock().serialize_failures += count;
    }
}
