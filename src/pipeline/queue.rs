//! Bounded drop-oldest FIFO between the event-delivery and consumption loops.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tracing::trace;

use super::features::FeatureVector;

pub const QUEUE_CAPACITY: usize = 100;

struct QueueInner {
    items: VecDeque<FeatureVector>,
    dropped: u64,
}

/// Every access goes through the mutex; the producer never blocks on
/// capacity, it evicts the oldest entry instead.
pub struct FeatureQueue {
    inner: Mutex<QueueInner>,
    capacity: usize,
}

impl Default for FeatureQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureQueue {
    pub fn new() -> Self {
        Self::with_capacity(QUEUE_CAPACITY)
    }

    /// A capacity of zero is treated as one.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::with_capacity(capacity),
                dropped: 0,
            }),
            capacity,
        }
    }

    /// Appends `vector`, evicting the oldest entry when full. Returns the
    /// evicted vector, if any.
    pub fn enqueue(&self, vector: FeatureVector) -> Option<FeatureVector> {
        let mut inner = self.inner.lock();
        let evicted = if inner.items.len() >= self.capacity {
            inner.dropped += 1;
            trace!("Feature queue full, dropping oldest (total dropped {})", inner.dropped);
            inner.items.pop_front()
        } else {
            None
        };
        inner.items.push_back(vector);
        evicted
    }

    pub fn dequeue(&self) -> Option<FeatureVector> {
        self.inner.lock().items.pop_front()
    }

    pub fn clear(&self) {
        self.inner.lock().items.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of vectors evicted since creation.
    pub fn dropped(&self) -> u64 {
        self.inner.lock().dropped
    }
}
