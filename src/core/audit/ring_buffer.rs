//! Bounded ring buffer for access audit entries
//!
//! Writers never block; the flush thread drains entries in batches.

use crossbeam::queue::ArrayQueue;
use crossbeam::utils::CachePadded;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Bounded ring buffer that overwrites the oldest entries when full
///
/// Evaluation threads write concurrently; a single flush thread reads.
pub struct RingBuffer<T> {
    queue: ArrayQueue<T>,
    /// Always a power of two
    capacity: usize,
    written: CachePadded<AtomicUsize>,
    read: CachePadded<AtomicUsize>,
}

impl<T> RingBuffer<T> {
    /// Create a buffer; `capacity` is rounded up to the next power of two
    ///
    /// # Panics
    /// Panics if capacity is 0
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Capacity must be greater than 0");
        let capacity = capacity.next_power_of_two();

        RingBuffer {
            queue: ArrayQueue::new(capacity),
            capacity,
            written: CachePadded::new(AtomicUsize::new(0)),
            read: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Write a value, evicting the oldest entry if the buffer is full
    ///
    /// A burst larger than the buffer loses its oldest entries rather than
    /// stalling evaluations.
    pub fn write(&self, value: T) {
        self.queue.force_push(value);
        self.written.fetch_add(1, Ordering::Relaxed);
    }

    /// Drain up to `max_count` entries, oldest first
    pub fn read_batch(&self, max_count: usize) -> Vec<T> {
        let mut batch = Vec::with_capacity(max_count.min(self.queue.len()));
        while batch.len() < max_count {
            match self.queue.pop() {
                Some(value) => batch.push(value),
                None => break,
            }
        }

        self.read.fetch_add(batch.len(), Ordering::Relaxed);
        batch
    }

    /// (entries written, entries read)
    ///
    /// Entries evicted by an overflowing write count as written but never read.
    pub fn stats(&self) -> (usize, usize) {
        (
            self.written.load(Ordering::Relaxed),
            self.read.load(Ordering::Relaxed),
        )
    }

    pub fn unread_count(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
