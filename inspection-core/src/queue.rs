//! Bounded multi-producer single-consumer queue.
//!
//! Producers on the bus adapter threads must never stall, so `push` is
//! non-blocking and refuses new elements when the queue is full (drop-newest).
//! The inspection worker drains in bulk from the other end. A per-queue drop
//! counter is exposed for the telemetry layer.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Fixed-capacity FIFO protected by a mutex.
///
/// The critical section covers a single `VecDeque` operation; producers hold
/// the lock only long enough to move one element in or out. FIFO order is
/// guaranteed by enqueue moment, with no ordering promise across producers.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    inner: Mutex<VecDeque<T>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl<T> BoundedQueue<T> {
    /// Creates a queue that holds at most `capacity` elements.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueues an element without blocking.
    ///
    /// Returns `false` and drops the element when the queue is full; existing
    /// elements are never overwritten.
    pub fn push(&self, element: T) -> bool {
        let mut queue = self.inner.lock().expect("queue mutex poisoned");
        if queue.len() >= self.capacity {
            drop(queue);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        queue.push_back(element);
        true
    }

    /// Dequeues the oldest element, returning immediately when empty.
    pub fn pop(&self) -> Option<T> {
        self.inner.lock().expect("queue mutex poisoned").pop_front()
    }

    /// Pops until empty, applying `consumer` to each element outside the lock.
    ///
    /// Returns the number of elements consumed. Elements pushed while a drain
    /// is in progress are picked up by the same drain.
    pub fn drain<F>(&self, mut consumer: F) -> usize
    where
        F: FnMut(T),
    {
        let mut consumed = 0;
        while let Some(element) = self.pop() {
            consumer(element);
            consumed += 1;
        }
        consumed
    }

    /// True when no elements are queued.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().expect("queue mutex poisoned").is_empty()
    }

    /// Number of elements currently queued.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("queue mutex poisoned").len()
    }

    /// Maximum number of elements this queue holds.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of elements refused because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
