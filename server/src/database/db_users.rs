//! User quota counters and API-key resolution
//!
//! The `users` table holds each user's fixed quota ceiling and a monotonic
//! counter of tasks ever created. The counter doubles as the task-id
//! sequence, so it is never decremented, not even on delete.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

/// A user's quota ceiling and creation counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserQuota {
    pub job_limit: i64,
    pub job_count: i64,
}

/// Outcome of an attempt to claim a task slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaSlot {
    /// Slot claimed; `job_count` is the post-increment counter value that
    /// mints the new task id.
    Allocated { job_count: i64 },
    /// The user is at their ceiling.
    QuotaExceeded { job_limit: i64 },
    /// No record for this user.
    UnknownUser,
}

/// Create the users and api_keys tables
pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            user_id TEXT PRIMARY KEY,
            job_limit INTEGER NOT NULL,
            job_count INTEGER NOT NULL DEFAULT 0
        )
        "#,
        [],
    )
    .context("Failed to create users table")?;

    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS api_keys (
            api_key TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            FOREIGN KEY (user_id) REFERENCES users (user_id)
        )
        "#,
        [],
    )
    .context("Failed to create api_keys table")?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_api_keys_user_id ON api_keys(user_id)",
        [],
    )?;

    Ok(())
}

/// Create a user or update an existing user's ceiling. The counter of an
/// existing user is left untouched.
pub fn provision_user(conn: &Connection, user_id: &str, job_limit: i64) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO users (user_id, job_limit, job_count)
        VALUES (?1, ?2, 0)
        ON CONFLICT(user_id) DO UPDATE SET job_limit = excluded.job_limit
        "#,
        params![user_id, job_limit],
    )
    .with_context(|| format!("Failed to provision user {}", user_id))?;

    Ok(())
}

/// Associate an API key with a user
pub fn provision_api_key(conn: &Connection, api_key: &str, user_id: &str) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO api_keys (api_key, user_id)
        VALUES (?1, ?2)
        ON CONFLICT(api_key) DO UPDATE SET user_id = excluded.user_id
        "#,
        params![api_key, user_id],
    )
    .with_context(|| format!("Failed to provision API key for user {}", user_id))?;

    Ok(())
}

/// Read a user's ceiling and counter
pub fn get_user_quota(conn: &Connection, user_id: &str) -> Result<Option<UserQuota>> {
    conn.query_row(
        "SELECT job_limit, job_count FROM users WHERE user_id = ?1",
        params![user_id],
        |row| {
            Ok(UserQuota {
                job_limit: row.get(0)?,
                job_count: row.get(1)?,
            })
        },
    )
    .optional()
    .with_context(|| format!("Failed to query user {}", user_id))
}

/// Atomically claim a task slot for a user.
///
/// The quota check and the counter bump happen in a single conditional
/// update, so two concurrent creations can neither both pass an exhausted
/// quota nor mint the same task id.
pub fn allocate_task_slot(conn: &Connection, user_id: &str) -> Result<QuotaSlot> {
    let allocated = conn
        .query_row(
            r#"
            UPDATE users
            SET job_count = job_count + 1
            WHERE user_id = ?1 AND job_count < job_limit
            RETURNING job_count
            "#,
            params![user_id],
            |row| row.get::<_, i64>(0),
        )
        .optional()
        .with_context(|| format!("Failed to allocate task slot for user {}", user_id))?;

    match allocated {
        Some(job_count) => Ok(QuotaSlot::Allocated { job_count }),
        None => match get_user_quota(conn, user_id)? {
            Some(quota) => Ok(QuotaSlot::QuotaExceeded {
                job_limit: quota.job_limit,
            }),
            None => Ok(QuotaSlot::UnknownUser),
        },
    }
}

/// Resolve an API key to its user id
pub fn resolve_api_key(conn: &Connection, api_key: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT user_id FROM api_keys WHERE api_key = ?1",
        params![api_key],
        |row| row.get(0),
    )
    .optional()
    .context("Failed to resolve API key")
}
