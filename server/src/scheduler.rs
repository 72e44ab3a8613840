//! Process-wide scheduling state
//!
//! The `Scheduler` bundles the firing queue, the dispatcher's sleep state
//! and wake channel, and the tombstone set. It is constructed once at
//! startup and cloned into every handler and worker; there are no static
//! globals, so tests can instantiate independent schedulers.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify, RwLock};
use tracing::{debug, info};

use crate::database::TaskStore;
use crate::queue::{FiringQueue, QueueEntry};

/// Queue plus dispatcher sleep flag, guarded together by one mutex.
///
/// Keeping `sleeping` under the queue lock is what makes the wake-on-insert
/// contract race-free: an inserter observes the flag and signals the wake
/// channel without the dispatcher being able to transition in between.
pub(crate) struct DispatchState {
    pub queue: FiringQueue,
    pub sleeping: bool,
}

/// Shared handle to the scheduling state.
#[derive(Clone)]
pub struct Scheduler {
    pub(crate) state: Arc<Mutex<DispatchState>>,
    /// Single-slot wake channel for the dispatcher; `notify_one` coalesces
    /// repeated signals into one stored permit.
    pub(crate) wake: Arc<Notify>,
    /// Task ids deleted since startup whose queued firings must be skipped.
    tombstones: Arc<RwLock<HashSet<String>>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(DispatchState {
                queue: FiringQueue::new(),
                sleeping: false,
            })),
            wake: Arc::new(Notify::new()),
            tombstones: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    /// Inserts a pending firing and wakes the dispatcher if it is asleep.
    ///
    /// The wake may be wasteful when the new entry is not the earliest; the
    /// dispatcher reconciles by re-peeking.
    pub async fn enqueue(&self, task_id: String, fire_at: i64) {
        let mut state = self.state.lock().await;
        debug!(task_id = %task_id, fire_at, "Enqueueing firing");
        state.queue.push(QueueEntry { task_id, fire_at });

        if state.sleeping {
            // Contract: signalled while still holding the queue mutex.
            self.wake.notify_one();
        }
    }

    pub async fn queue_len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    /// Marks a task as deleted so that already-queued firings are skipped.
    pub async fn mark_deleted(&self, task_id: &str) {
        self.tombstones.write().await.insert(task_id.to_string());
    }

    pub async fn is_deleted(&self, task_id: &str) -> bool {
        self.tombstones.read().await.contains(task_id)
    }

    /// Drops a tombstone once its queued firing has drained from the heap.
    pub async fn clear_tombstone(&self, task_id: &str) {
        self.tombstones.write().await.remove(task_id);
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Rehydrates the queue from the durable store on startup.
///
/// Every non-terminal record is re-enrolled at its stored `next_execution`,
/// so past-due tasks fire on the dispatcher's next turn in time order.
/// Terminal records are retained in the store but never re-enqueued.
pub async fn rehydrate(
    store: &Arc<Mutex<TaskStore>>,
    scheduler: &Scheduler,
    max_executions: u32,
) -> anyhow::Result<usize> {
    let tasks = {
        let mut store = store.lock().await;
        store.scan_tasks().await?
    };

    let mut enrolled = 0;
    for task in tasks {
        if task.is_terminal(max_executions) {
            debug!(task_id = %task.task_id, "Skipping terminal task during rehydration");
            continue;
        }
        let fire_at = task.next_execution.timestamp();
        scheduler.enqueue(task.task_id, fire_at).await;
        enrolled += 1;
    }

    info!(enrolled, "Rehydrated pending firings from store");
    Ok(enrolled)
}
