//! API types and structures for the task scheduling REST interface
//!
//! This module defines the request and response types used by the REST API
//! endpoints, together with the header and path constants shared between the
//! handlers and the tests.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Request body for POST /tasks.
///
/// Every field except `timeOutAfter` is required by the contract, but all of
/// them deserialize as `Option` so that the handler can report missing fields
/// as a 400 instead of letting the extractor reject the body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    pub api_method: Option<String>,
    #[serde(rename = "apiURL")]
    pub api_url: Option<String>,
    pub start_from: Option<String>,
    /// Seconds between occurrences; must be positive.
    pub frequency: Option<u64>,
    pub api_body: Option<Map<String, Value>>,
    /// Optional per-task outbound timeout in seconds; 0 or absent means the
    /// server default applies.
    #[serde(default)]
    pub time_out_after: Option<u64>,
}

impl CreateTaskRequest {
    /// Names of required fields that are absent from this request.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.api_method.is_none() {
            missing.push("apiMethod");
        }
        if self.api_url.is_none() {
            missing.push("apiURL");
        }
        if self.start_from.is_none() {
            missing.push("startFrom");
        }
        if self.frequency.is_none() {
            missing.push("frequency");
        }
        if self.api_body.is_none() {
            missing.push("apiBody");
        }
        missing
    }
}

/// Response body for a successful POST /tasks
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskResponse {
    pub task_id: String,
}

/// Response body for a successful DELETE /tasks/{taskID}
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteTaskResponse {
    pub message: String,
}

/// Error body returned by every failing endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// HTTP header names
pub mod headers {
    pub const API_KEY: &str = "X-API-KEY";
    pub const CONTENT_TYPE: &str = "Content-Type";
}

/// API endpoint paths
pub mod endpoints {
    pub const TASKS: &str = "/tasks";
    pub const TASK_BY_ID: &str = "/tasks/{taskID}";
    pub const HEALTH: &str = "/health";
}
