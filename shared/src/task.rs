//! Task record for the recurring HTTP job scheduler
//!
//! A task is a user-owned, durable description of a recurring outbound HTTP
//! call. The record is created by enrollment, mutated only by the executor,
//! and retained after it reaches its terminal execution count.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The only outbound method currently supported by the executor.
pub const SUPPORTED_METHODS: &[&str] = &["POST"];

/// Placeholder value of `last_execution` before the first fire.
pub fn last_execution_sentinel() -> DateTime<Utc> {
    // 2017-01-01T00:00:00Z
    DateTime::from_timestamp(1_483_228_800, 0).expect("sentinel timestamp is in range")
}

/// A durable task record.
///
/// Timestamps are UTC and serialize as RFC-3339 strings. The wire names
/// follow the public API (`taskId`, `apiURL`, ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub task_id: String,
    pub user_id: String,
    pub api_method: String,
    #[serde(rename = "apiURL")]
    pub api_url: String,
    pub api_body: Map<String, Value>,
    /// The raw start time string as submitted at creation; immutable.
    pub start_from: String,
    /// Seconds between occurrences.
    pub frequency: u64,
    /// Per-task outbound timeout in seconds; 0 means the server default.
    pub time_out_after: u64,
    pub total_executions: u32,
    pub last_execution: DateTime<Utc>,
    pub next_execution: DateTime<Utc>,
}

impl Task {
    /// Builds a fresh record at enrollment time. The first occurrence is the
    /// parsed `startFrom` instant.
    #[allow(clippy::too_many_arguments)]
    pub fn enroll(
        task_id: String,
        user_id: String,
        api_method: String,
        api_url: String,
        api_body: Map<String, Value>,
        start_from: String,
        first_fire: DateTime<Utc>,
        frequency: u64,
        time_out_after: u64,
    ) -> Self {
        Self {
            task_id,
            user_id,
            api_method,
            api_url,
            api_body,
            start_from,
            frequency,
            time_out_after,
            total_executions: 0,
            last_execution: last_execution_sentinel(),
            next_execution: first_fire,
        }
    }

    /// Whether the record has reached its occurrence cap and must not be
    /// re-enrolled.
    pub fn is_terminal(&self, max_executions: u32) -> bool {
        self.total_executions >= max_executions
    }

    /// Advances the execution bookkeeping for a firing that happened at
    /// `now`. Returns the next occurrence when the task stays live, `None`
    /// once the cap is reached.
    pub fn record_firing(&mut self, now: DateTime<Utc>, max_executions: u32) -> Option<DateTime<Utc>> {
        self.last_execution = now;
        self.total_executions += 1;

        if self.total_executions >= max_executions {
            return None;
        }

        let next = now + Duration::seconds(self.frequency as i64);
        self.next_execution = next;
        Some(next)
    }

    /// Whether `user_id` owns this record, judged by the task-id prefix.
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        task_is_owned_by(&self.task_id, user_id)
    }
}

/// Ownership check on a raw task id: the prefix before `'_'` carries the
/// owner, so `"alice_3"` belongs to `"alice"` and nobody else.
pub fn task_is_owned_by(task_id: &str, user_id: &str) -> bool {
    task_id
        .strip_prefix(user_id)
        .is_some_and(|rest| rest.starts_with('_'))
}

/// Mints the task id for a user's `n`-th created task.
pub fn mint_task_id(user_id: &str, job_count: i64) -> String {
    format!("{}_{}", user_id, job_count)
}
