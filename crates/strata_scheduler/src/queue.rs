//! # Finalization Queue
//!
//! Priority hand-off from worker threads to the consumer thread.
//!
//! ```text
//!   Worker 1 ──┐
//!   Worker 2 ──┼──> [Mutex<BinaryHeap>] ──> drain() on render thread
//!   Worker N ──┘     (max priority first)
//! ```
//!
//! Priority is captured when an item is pushed, so the order inside the
//! heap never depends on state that might change later. Equal priorities
//! pop in push order.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use parking_lot::Mutex;

struct Entry<P, T> {
    priority: P,
    seq: u64,
    item: T,
}

impl<P: Ord, T> PartialEq for Entry<P, T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<P: Ord, T> Eq for Entry<P, T> {}

impl<P: Ord, T> PartialOrd for Entry<P, T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<P: Ord, T> Ord for Entry<P, T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap on priority; lower seq wins ties.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Thread-safe max-priority queue with FIFO tie-breaking.
pub struct FinalizationQueue<P, T> {
    heap: Mutex<BinaryHeap<Entry<P, T>>>,
    next_seq: AtomicU64,
}

impl<P: Ord, T> FinalizationQueue<P, T> {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Pushes `item` with the given priority.
    pub fn push(&self, priority: P, item: T) {
        let mut heap = self.heap.lock();
        // Sequence is taken under the lock so it matches heap insertion order.
        let seq = self.next_seq.fetch_add(1, AtomicOrdering::Relaxed);
        heap.push(Entry { priority, seq, item });
    }

    /// Pops the highest-priority item, or `None` if empty.
    pub fn pop(&self) -> Option<T> {
        self.heap.lock().pop().map(|entry| entry.item)
    }

    /// Number of queued items (snapshot).
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    /// Returns true if the queue is empty (snapshot).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.lock().is_empty()
    }
}

impl<P: Ord, T> Default for FinalizationQueue<P, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P, T> std::fmt::Debug for FinalizationQueue<P, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FinalizationQueue")
            .field("len", &self.heap.lock().len())
            .finish()
    }
}
