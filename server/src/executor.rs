//! Outbound execution of fired tasks
//!
//! Given a popped task id, the executor consults the tombstone set, loads
//! the record, performs the outbound HTTP call, advances the execution
//! bookkeeping, and re-enrolls the next occurrence unless the task has
//! reached its cap. Store failures here are logged and swallowed: the firing
//! is lost, never retried.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};

use crate::database::TaskStore;
use crate::scheduler::Scheduler;
use shared::task::Task;

#[derive(Clone)]
pub struct Executor {
    client: reqwest::Client,
    store: Arc<Mutex<TaskStore>>,
    scheduler: Scheduler,
    /// Caps the number of firings running at once.
    firing_slots: Arc<Semaphore>,
    total_slots: usize,
    max_executions: u32,
    default_timeout: Duration,
}

impl Executor {
    pub fn new(
        store: Arc<Mutex<TaskStore>>,
        scheduler: Scheduler,
        max_concurrent_firings: usize,
        max_executions: u32,
        outbound_timeout_seconds: u64,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("Failed to build outbound HTTP client")?;

        Ok(Self {
            client,
            store,
            scheduler,
            firing_slots: Arc::new(Semaphore::new(max_concurrent_firings)),
            total_slots: max_concurrent_firings,
            max_executions,
            default_timeout: Duration::from_secs(outbound_timeout_seconds),
        })
    }

    /// Executes one firing of `task_id`.
    pub async fn fire(&self, task_id: &str) {
        let _permit = match self.firing_slots.acquire().await {
            Ok(permit) => permit,
            Err(_) => return, // semaphore closed during shutdown
        };

        if self.scheduler.is_deleted(task_id).await {
            info!(task_id = %task_id, "Not executing deleted task");
            // The queued entry for this task has now drained, so the
            // tombstone has served its purpose.
            self.scheduler.clear_tombstone(task_id).await;
            return;
        }

        let fetched = {
            let mut store = self.store.lock().await;
            store.get_task(task_id).await
        };
        let mut task = match fetched {
            Ok(Some(task)) => task,
            Ok(None) => {
                warn!(task_id = %task_id, "Dropping firing for unknown task");
                return;
            }
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "Failed to load task, dropping firing");
                return;
            }
        };

        match self.execute_call(&task).await {
            Ok(status) => {
                debug!(task_id = %task_id, status = %status, "Outbound call completed");
            }
            Err(e) => {
                // Failed attempts still count toward the execution cap.
                warn!(task_id = %task_id, error = %e, "Outbound call failed");
            }
        }

        let now = Utc::now();
        match task.record_firing(now, self.max_executions) {
            Some(next) => {
                self.scheduler
                    .enqueue(task.task_id.clone(), next.timestamp())
                    .await;
            }
            None => {
                info!(
                    task_id = %task_id,
                    total_executions = task.total_executions,
                    "Task reached its execution cap"
                );
            }
        }

        let updated = {
            let mut store = self.store.lock().await;
            store
                .update_task_execution(
                    &task.task_id,
                    task.last_execution,
                    task.total_executions,
                    task.next_execution,
                )
                .await
        };
        if let Err(e) = updated {
            warn!(task_id = %task_id, error = %e, "Failed to persist execution bookkeeping");
        }
    }

    /// Performs the outbound HTTP call for a task.
    ///
    /// Only POST is supported; any other stored method is a no-op failure
    /// that still advances the task's bookkeeping.
    async fn execute_call(&self, task: &Task) -> Result<reqwest::StatusCode> {
        if task.api_method != "POST" {
            anyhow::bail!("unsupported apiMethod '{}', no call performed", task.api_method);
        }

        let timeout = if task.time_out_after > 0 {
            Duration::from_secs(task.time_out_after)
        } else {
            self.default_timeout
        };

        let response = self
            .client
            .post(&task.api_url)
            .timeout(timeout)
            .json(&task.api_body)
            .send()
            .await
            .with_context(|| format!("POST {} failed", task.api_url))?;

        Ok(response.status())
    }

    /// Waits until no firing is in flight. Used during graceful shutdown.
    pub async fn drain(&self) {
        let _permits = self.firing_slots.acquire_many(self.total_slots as u32).await;
    }
}
