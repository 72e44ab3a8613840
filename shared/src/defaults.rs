//! Default values for configuration parameters
//!
//! This module centralizes all default value functions used by the
//! configuration structures. These functions are used by serde when
//! deserializing configuration files that don't specify certain fields.

/// Default listen address for the HTTP ingress
pub fn default_listen_address() -> String {
    "0.0.0.0:8080".to_string()
}

/// Default directory for the SQLite task store
pub fn default_data_dir() -> String {
    "./data".to_string()
}

/// Default directory for rolling log files
pub fn default_log_dir() -> String {
    "./logs".to_string()
}

/// Default dispatcher sleep when the queue is empty (60 seconds)
pub fn default_idle_wait() -> u64 {
    60
}

/// Default per-task occurrence cap (30 executions)
pub fn default_max_executions() -> u32 {
    30
}

/// Default cap on concurrently running firings (64)
pub fn default_max_concurrent_firings() -> usize {
    64
}

/// Default outbound HTTP timeout (30 seconds)
pub fn default_outbound_timeout() -> u64 {
    30
}

/// Default grace period for in-flight firings during shutdown (30 seconds)
pub fn default_graceful_shutdown_timeout() -> u64 {
    30
}
