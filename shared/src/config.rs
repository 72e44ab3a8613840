//! Configuration types and validation for the scheduler
//!
//! This module defines the server configuration loaded from scheduler.toml,
//! including serde defaults and post-load validation.

use crate::defaults::*;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

/// Main scheduler configuration loaded from scheduler.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerConfig {
    /// Address and port the HTTP ingress binds to
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    /// Directory holding the SQLite database file
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Directory for rolling log files
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    /// How long the dispatcher sleeps when the queue is empty, in seconds
    #[serde(default = "default_idle_wait")]
    pub idle_wait_seconds: u64,
    /// Per-task occurrence cap; a task becomes terminal once its execution
    /// count reaches this value
    #[serde(default = "default_max_executions")]
    pub max_executions: u32,
    /// Maximum number of firings running at the same time
    #[serde(default = "default_max_concurrent_firings")]
    pub max_concurrent_firings: usize,
    /// Default timeout for outbound HTTP calls, in seconds; a task's
    /// timeOutAfter overrides this when set
    #[serde(default = "default_outbound_timeout")]
    pub outbound_timeout_seconds: u64,
    /// Maximum time to wait for in-flight firings during graceful shutdown
    #[serde(default = "default_graceful_shutdown_timeout")]
    pub graceful_shutdown_timeout_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            data_dir: default_data_dir(),
            log_dir: default_log_dir(),
            idle_wait_seconds: default_idle_wait(),
            max_executions: default_max_executions(),
            max_concurrent_firings: default_max_concurrent_firings(),
            outbound_timeout_seconds: default_outbound_timeout(),
            graceful_shutdown_timeout_seconds: default_graceful_shutdown_timeout(),
        }
    }
}

impl SchedulerConfig {
    /// Loads and validates the configuration from a TOML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::SchedulerError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            crate::SchedulerError::Config(format!(
                "Failed to parse config file {}: {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    pub fn validate(&self) -> crate::Result<()> {
        self.listen_address.parse::<SocketAddr>().map_err(|e| {
            crate::SchedulerError::Config(format!(
                "Invalid listen address '{}': {}",
                self.listen_address, e
            ))
        })?;

        if self.idle_wait_seconds == 0 {
            return Err(
                crate::SchedulerError::Config("idle_wait_seconds must be at least 1".to_string())
                    .into(),
            );
        }

        if self.max_executions == 0 {
            return Err(
                crate::SchedulerError::Config("max_executions must be at least 1".to_string())
                    .into(),
            );
        }

        if self.max_concurrent_firings == 0 {
            return Err(crate::SchedulerError::Config(
                "max_concurrent_firings must be at least 1".to_string(),
            )
            .into());
        }

        Ok(())
    }
}
