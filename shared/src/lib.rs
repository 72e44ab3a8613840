//! Shared data structures and utilities for the recurring HTTP job scheduler
//!
//! This crate contains the task data model, API request/response types,
//! configuration structures, and utilities used by the server component.

pub mod api;
pub mod config;
pub mod defaults;
pub mod task;
pub mod utils;

// Re-export commonly used types for convenience
pub use api::{CreateTaskRequest, CreateTaskResponse, DeleteTaskResponse};
pub use config::SchedulerConfig;
pub use task::Task;
pub use utils::{current_timestamp, parse_start_from};

/// Result type alias used throughout the shared crate
pub type Result<T> = anyhow::Result<T>;

/// Common error types for the scheduler
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Task execution error: {0}")]
    TaskExecution(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests;
