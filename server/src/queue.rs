//! Priority queue of pending job firings
//!
//! A binary min-heap keyed on the Unix epoch second at which a firing is
//! due. Entries carry no back-reference to the task record; the executor
//! reconciles against the store when an entry is popped.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// One pending firing: a task id and the epoch second it is due at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub task_id: String,
    pub fire_at: i64,
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Ascending fire time; the task-id tie break keeps the order total.
        self.fire_at
            .cmp(&other.fire_at)
            .then_with(|| self.task_id.cmp(&other.task_id))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Min-heap of pending firings.
///
/// The queue does not deduplicate: pushing the same task id twice yields two
/// entries that fire independently.
#[derive(Debug, Default)]
pub struct FiringQueue {
    heap: BinaryHeap<Reverse<QueueEntry>>,
}

impl FiringQueue {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
        }
    }

    pub fn push(&mut self, entry: QueueEntry) {
        self.heap.push(Reverse(entry));
    }

    /// Removes and returns the earliest entry, or `None` when empty.
    pub fn pop_min(&mut self) -> Option<QueueEntry> {
        self.heap.pop().map(|Reverse(entry)| entry)
    }

    /// Returns the earliest entry without removing it, or `None` when empty.
    pub fn peek_min(&self) -> Option<&QueueEntry> {
        self.heap.peek().map(|Reverse(entry)| entry)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
