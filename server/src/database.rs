//! Durable task store
//!
//! SQLite-backed persistence for task records, per-user quota counters, and
//! the API-key table. The store is the single source of truth for task
//! state; the in-memory queue only ever holds `(task_id, fire_at)` pairs and
//! reconciles against the store at firing time.

// Table-specific submodules
mod db_tasks;
mod db_users;

pub use db_users::{QuotaSlot, UserQuota};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use shared::task::Task;
use std::path::{Path, PathBuf};
use tracing::info;

/// The default name for the scheduler's database file.
const DATABASE_FILE: &str = "scheduler.db";

/// Manages the SQLite database for the scheduler.
/// This struct encapsulates the database connection and all related
/// operations, providing a high-level API to the rest of the server.
pub struct TaskStore {
    /// The path to the SQLite database file.
    db_path: PathBuf,
    /// The active database connection, opened lazily.
    connection: Option<Connection>,
}

impl TaskStore {
    /// Creates a new `TaskStore` manager, ensuring the data directory exists.
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        if !data_dir.exists() {
            std::fs::create_dir_all(data_dir).with_context(|| {
                format!("Failed to create data directory: {}", data_dir.display())
            })?;
        }

        Ok(Self {
            db_path: data_dir.join(DATABASE_FILE),
            connection: None,
        })
    }

    /// Initializes the database by creating tables and indexes if they don't
    /// exist. Idempotent and safe to call on every startup.
    pub async fn initialize(&mut self) -> Result<()> {
        info!("Initializing task store at {}", self.db_path.display());

        let conn = self.get_connection()?;
        db_tasks::create_table(conn)?;
        db_users::create_tables(conn)?;

        info!("Task store initialization complete");
        Ok(())
    }

    /// Lazily gets a mutable reference to the database connection, creating
    /// it if needed.
    pub fn get_connection(&mut self) -> Result<&mut Connection> {
        if self.connection.is_none() {
            let conn = Connection::open(&self.db_path)
                .with_context(|| format!("Failed to open database: {}", self.db_path.display()))?;

            // WAL mode is good for concurrency.
            conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))
                .context("Failed to enable WAL mode")?;

            conn.execute("PRAGMA foreign_keys=ON", [])
                .context("Failed to enable foreign key constraints")?;

            // Reduce lock errors in a concurrent environment.
            conn.busy_timeout(std::time::Duration::from_secs(30))
                .context("Failed to set busy timeout")?;

            self.connection = Some(conn);
        }
        Ok(self
            .connection
            .as_mut()
            .expect("Database connection should exist after initialization in get_connection()"))
    }

    /// Closes the database connection.
    pub async fn close(&mut self) {
        if let Some(conn) = self.connection.take() {
            let _ = conn.close();
        }
    }

    // ----- task records -----

    /// Persists a freshly enrolled task record.
    pub async fn put_task(&mut self, task: &Task) -> Result<()> {
        let conn = self.get_connection()?;
        db_tasks::put_task(conn, task)
    }

    /// Fetches a task record by id.
    pub async fn get_task(&mut self, task_id: &str) -> Result<Option<Task>> {
        let conn = self.get_connection()?;
        db_tasks::get_task(conn, task_id)
    }

    /// Writes the executor's bookkeeping fields for one firing.
    pub async fn update_task_execution(
        &mut self,
        task_id: &str,
        last_execution: DateTime<Utc>,
        total_executions: u32,
        next_execution: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.get_connection()?;
        db_tasks::update_execution(conn, task_id, last_execution, total_executions, next_execution)
    }

    /// Deletes a task record. Fails when no such record exists.
    pub async fn delete_task(&mut self, task_id: &str) -> Result<()> {
        let conn = self.get_connection()?;
        db_tasks::delete_task(conn, task_id)
    }

    /// Returns every stored task record. Used by bootstrap.
    pub async fn scan_tasks(&mut self) -> Result<Vec<Task>> {
        let conn = self.get_connection()?;
        db_tasks::scan_tasks(conn)
    }

    // ----- users and API keys -----

    /// Creates a user with the given quota ceiling, or updates the ceiling
    /// of an existing user. Provisioning happens out of band.
    pub async fn provision_user(&mut self, user_id: &str, job_limit: i64) -> Result<()> {
        let conn = self.get_connection()?;
        db_users::provision_user(conn, user_id, job_limit)
    }

    /// Associates an API key with a user.
    pub async fn provision_api_key(&mut self, api_key: &str, user_id: &str) -> Result<()> {
        let conn = self.get_connection()?;
        db_users::provision_api_key(conn, api_key, user_id)
    }

    /// Reads a user's quota ceiling and counter.
    pub async fn get_user_quota(&mut self, user_id: &str) -> Result<Option<UserQuota>> {
        let conn = self.get_connection()?;
        db_users::get_user_quota(conn, user_id)
    }

    /// Atomically claims a task slot for the user: bumps `job_count` only
    /// while it is below `job_limit` and returns the post-increment count
    /// used to mint the task id.
    pub async fn allocate_task_slot(&mut self, user_id: &str) -> Result<QuotaSlot> {
        let conn = self.get_connection()?;
        db_users::allocate_task_slot(conn, user_id)
    }

    /// Resolves an API key to its user id.
    pub async fn resolve_api_key(&mut self, api_key: &str) -> Result<Option<String>> {
        let conn = self.get_connection()?;
        db_users::resolve_api_key(conn, api_key)
    }
}
