//! The dispatcher worker
//!
//! A single long-running loop that pops due firings off the queue and hands
//! them to the executor without blocking on the outbound call. When nothing
//! is due it sleeps until the earliest pending entry, and the sleep is
//! cancellable: inserting a sooner job wakes it immediately.

use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::executor::Executor;
use crate::queue::QueueEntry;
use crate::scheduler::Scheduler;
use shared::utils::current_timestamp;

/// What a single turn of the loop decided to do.
enum Turn {
    Fire(QueueEntry),
    Sleep(Duration),
}

pub struct Dispatcher {
    scheduler: Scheduler,
    executor: Executor,
    /// Sleep used when the queue is empty.
    idle_wait: Duration,
}

impl Dispatcher {
    pub fn new(scheduler: Scheduler, executor: Executor, idle_wait_seconds: u64) -> Self {
        Self {
            scheduler,
            executor,
            idle_wait: Duration::from_secs(idle_wait_seconds),
        }
    }

    /// Runs the dispatch loop until the shutdown signal arrives.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("Dispatcher started");

        loop {
            let turn = {
                let mut state = self.scheduler.state.lock().await;
                state.sleeping = false;

                let now = current_timestamp();
                let due = matches!(state.queue.peek_min(), Some(entry) if entry.fire_at <= now);

                if let Some(entry) = if due { state.queue.pop_min() } else { None } {
                    Turn::Fire(entry)
                } else {
                    let wait = match state.queue.peek_min() {
                        Some(entry) => {
                            debug!(
                                task_id = %entry.task_id,
                                fire_at = entry.fire_at,
                                "Earliest entry not due yet"
                            );
                            Duration::from_secs(entry.fire_at.saturating_sub(now).max(0) as u64)
                        }
                        None => self.idle_wait,
                    };
                    // Must be set before the lock is released so inserters
                    // observe it and signal the wake channel.
                    state.sleeping = true;
                    Turn::Sleep(wait)
                }
            };

            match turn {
                Turn::Fire(entry) => {
                    debug!(task_id = %entry.task_id, fire_at = entry.fire_at, "Dispatching due firing");
                    // The firing runs in its own task so a slow outbound
                    // call cannot delay a sooner entry.
                    let executor = self.executor.clone();
                    let task_id = entry.task_id;
                    tokio::spawn(async move {
                        executor.fire(&task_id).await;
                    });
                }
                Turn::Sleep(duration) => {
                    debug!(sleep_seconds = duration.as_secs(), "Dispatcher sleeping");
                    tokio::select! {
                        _ = tokio::time::sleep(duration) => {}
                        _ = self.scheduler.wake.notified() => {
                            debug!("Sleep cancelled by a new insert");
                        }
                        _ = shutdown_rx.recv() => {
                            info!("Dispatcher received shutdown signal");
                            break;
                        }
                    }
                }
            }
        }
    }
}
