use std::collections::VecDeque;

use serde::Serialize;

// ---------------------------------------------------------------------------
// RingBuffer -- bounded history for a single indicator instance
// ---------------------------------------------------------------------------

/// Fixed-capacity FIFO.  Pushing into a full buffer evicts the oldest entry,
/// so memory stays at `capacity` no matter how long the stream runs.
#[derive(Debug, Clone, Serialize)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    /// Create a buffer that retains at most `capacity` items (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append `item`, returning the evicted oldest item when full.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() == self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Index 0 is the oldest retained item.
    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    pub fn last(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn first(&self) -> Option<&T> {
        self.items.front()
    }

    /// Oldest-first iterator.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.items.iter()
    }

    /// The most recent `count` items, oldest first.
    pub fn tail(&self, count: usize) -> impl Iterator<Item = &T> {
        let start = self.items.len().saturating_sub(count);
        self.items.range(start..)
    }

    /// Contiguous oldest-first view; rearranges storage in place if needed.
    pub fn as_slice(&mut self) -> &[T] {
        self.items.make_contiguous()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl RingBuffer<f64> {
    /// Arithmetic mean of the most recent `count` values.
    pub fn mean_of_last(&self, count: usize) -> Option<f64> {
        let n = count.min(self.items.len());
        if n == 0 {
            return None;
        }
        Some(self.tail(n).sum::<f64>() / n as f64)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
