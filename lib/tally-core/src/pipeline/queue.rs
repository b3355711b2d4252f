use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard, PoisonError},
};

use bytes::Bytes;

/// A bounded FIFO queue of serialized data points.
///
/// The queue itself does not enforce the bound: whoever appends checks [`max_len`][Self::max_len] while holding the
/// lock, which lets a run of appends share a single lock acquisition.
pub(crate) struct BoundedQueue {
    entries: Mutex<VecDeque<Bytes>>,
    max_len: usize,
}

impl BoundedQueue {
    pub fn new(max_len: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            max_len,
        }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    pub fn lock(&self) -> MutexGuard<'_, VecDeque<Bytes>> {
        // Nothing that can panic runs while the lock is held.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Removes up to `max` entries from the front of the queue.
    pub fn pop_batch(&self, max: usize) -> Vec<Bytes> {
        let mut entries = self.lock();
        let len = entries.len().min(max);
        entries.drain(..len).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pop_batch_is_fifo_and_bounded() {
        let queue = BoundedQueue::new(10);
        queue.lock().extend((0..5).map(|i| Bytes::from(i.to_string())));

        assert_eq!(queue.pop_batch(2), vec![Bytes::from("0"), Bytes::from("1")]);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop_batch(10), vec![Bytes::from("2"), Bytes::from("3"), Bytes::from("4")]);
        assert!(queue.pop_batch(10).is_empty());
    }
}
