//! Task record persistence
//!
//! CRUD over the `tasks` table. Timestamps are stored as RFC-3339 strings;
//! the request body is stored as serialized JSON.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use shared::task::Task;

/// Create the tasks table and its indexes
pub fn create_table(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            task_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            api_method TEXT NOT NULL,
            api_url TEXT NOT NULL,
            api_body TEXT NOT NULL,
            start_from TEXT NOT NULL,
            frequency INTEGER NOT NULL,
            time_out_after INTEGER NOT NULL DEFAULT 0,
            total_executions INTEGER NOT NULL DEFAULT 0,
            last_execution TEXT NOT NULL,
            next_execution TEXT NOT NULL
        )
        "#,
        [],
    )
    .context("Failed to create tasks table")?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tasks_user_id ON tasks(user_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tasks_next_execution ON tasks(next_execution)",
        [],
    )?;

    Ok(())
}

/// Raw column values of one row, decoded into a `Task` outside the rusqlite
/// row callback so parse errors surface as regular errors.
struct TaskRow {
    task_id: String,
    user_id: String,
    api_method: String,
    api_url: String,
    api_body: String,
    start_from: String,
    frequency: i64,
    time_out_after: i64,
    total_executions: i64,
    last_execution: String,
    next_execution: String,
}

const TASK_COLUMNS: &str = "task_id, user_id, api_method, api_url, api_body, start_from, \
     frequency, time_out_after, total_executions, last_execution, next_execution";

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskRow> {
    Ok(TaskRow {
        task_id: row.get(0)?,
        user_id: row.get(1)?,
        api_method: row.get(2)?,
        api_url: row.get(3)?,
        api_body: row.get(4)?,
        start_from: row.get(5)?,
        frequency: row.get(6)?,
        time_out_after: row.get(7)?,
        total_executions: row.get(8)?,
        last_execution: row.get(9)?,
        next_execution: row.get(10)?,
    })
}

fn parse_timestamp(raw: &str, column: &str, task_id: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|parsed| parsed.with_timezone(&Utc))
        .with_context(|| format!("Invalid {} timestamp '{}' for task {}", column, raw, task_id))
}

fn decode(row: TaskRow) -> Result<Task> {
    let api_body = serde_json::from_str(&row.api_body)
        .with_context(|| format!("Invalid stored api_body for task {}", row.task_id))?;
    let last_execution = parse_timestamp(&row.last_execution, "last_execution", &row.task_id)?;
    let next_execution = parse_timestamp(&row.next_execution, "next_execution", &row.task_id)?;

    Ok(Task {
        task_id: row.task_id,
        user_id: row.user_id,
        api_method: row.api_method,
        api_url: row.api_url,
        api_body,
        start_from: row.start_from,
        frequency: row.frequency as u64,
        time_out_after: row.time_out_after as u64,
        total_executions: row.total_executions as u32,
        last_execution,
        next_execution,
    })
}

/// Insert a freshly enrolled task record
pub fn put_task(conn: &Connection, task: &Task) -> Result<()> {
    let api_body = serde_json::to_string(&task.api_body)
        .with_context(|| format!("Failed to serialize api_body for task {}", task.task_id))?;

    conn.execute(
        r#"
        INSERT INTO tasks (
            task_id, user_id, api_method, api_url, api_body, start_from,
            frequency, time_out_after, total_executions, last_execution, next_execution
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        "#,
        params![
            task.task_id,
            task.user_id,
            task.api_method,
            task.api_url,
            api_body,
            task.start_from,
            task.frequency as i64,
            task.time_out_after as i64,
            task.total_executions as i64,
            task.last_execution.to_rfc3339(),
            task.next_execution.to_rfc3339(),
        ],
    )
    .with_context(|| format!("Failed to insert task {}", task.task_id))?;

    Ok(())
}

/// Fetch one task record by id
pub fn get_task(conn: &Connection, task_id: &str) -> Result<Option<Task>> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM tasks WHERE task_id = ?1", TASK_COLUMNS),
            params![task_id],
            read_row,
        )
        .optional()
        .with_context(|| format!("Failed to query task {}", task_id))?;

    row.map(decode).transpose()
}

/// Write the bookkeeping fields the executor maintains
pub fn update_execution(
    conn: &Connection,
    task_id: &str,
    last_execution: DateTime<Utc>,
    total_executions: u32,
    next_execution: DateTime<Utc>,
) -> Result<()> {
    let updated = conn
        .execute(
            r#"
            UPDATE tasks
            SET last_execution = ?1, total_executions = ?2, next_execution = ?3
            WHERE task_id = ?4
            "#,
            params![
                last_execution.to_rfc3339(),
                total_executions as i64,
                next_execution.to_rfc3339(),
                task_id
            ],
        )
        .with_context(|| format!("Failed to update task {}", task_id))?;

    if updated == 0 {
        anyhow::bail!("No task record to update for {}", task_id);
    }
    Ok(())
}

/// Delete one task record; fails when the record does not exist
pub fn delete_task(conn: &Connection, task_id: &str) -> Result<()> {
    let deleted = conn
        .execute("DELETE FROM tasks WHERE task_id = ?1", params![task_id])
        .with_context(|| format!("Failed to delete task {}", task_id))?;

    if deleted == 0 {
        anyhow::bail!("No task record to delete for {}", task_id);
    }
    Ok(())
}

/// Scan every task record
pub fn scan_tasks(conn: &Connection) -> Result<Vec<Task>> {
    let mut statement = conn
        .prepare(&format!("SELECT {} FROM tasks", TASK_COLUMNS))
        .context("Failed to prepare task scan")?;

    let rows = statement
        .query_map([], read_row)
        .context("Failed to scan tasks")?;

    let mut tasks = Vec::new();
    for row in rows {
        tasks.push(decode(row.context("Failed to read task row")?)?);
    }
    Ok(tasks)
}
