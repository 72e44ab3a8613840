//! Utility functions for the scheduler
//!
//! Time parsing and URL validation helpers shared by the API layer and the
//! store.

use chrono::{DateTime, NaiveDateTime, Utc};
use std::time::{SystemTime, UNIX_EPOCH};

/// The original fixed layout accepted for `startFrom`, interpreted as UTC.
const LEGACY_START_FROM_LAYOUT: &str = "%Y-%m-%d %H:%M:%S";

/// Get current Unix timestamp in seconds
pub fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Parses a `startFrom` value.
///
/// RFC-3339 is the preferred form; the legacy `"YYYY-MM-DD HH:MM:SS"`
/// layout is still accepted and treated as UTC wall-clock time.
pub fn parse_start_from(raw: &str) -> crate::Result<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, LEGACY_START_FROM_LAYOUT) {
        return Ok(naive.and_utc());
    }

    Err(crate::SchedulerError::Validation(format!(
        "startFrom '{}' must be RFC 3339 or 'YYYY-MM-DD HH:MM:SS' in UTC",
        raw
    ))
    .into())
}

/// Validate URL format and structure
///
/// Performs proper URL parsing to ensure:
/// - URL is syntactically valid
/// - Uses http or https scheme
/// - Has a valid host
/// - Does not contain embedded credentials (security risk)
pub fn validate_url(url_str: &str) -> crate::Result<()> {
    use url::Url;

    let parsed = Url::parse(url_str).map_err(|e| {
        crate::SchedulerError::Validation(format!("Invalid URL '{}': {}", url_str, e))
    })?;

    let scheme = parsed.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(crate::SchedulerError::Validation(format!(
            "URL '{}' must use http:// or https:// scheme",
            url_str
        ))
        .into());
    }

    if parsed.host().is_none() {
        return Err(crate::SchedulerError::Validation(format!(
            "URL '{}' must have a valid host",
            url_str
        ))
        .into());
    }

    // Reject URLs with embedded credentials
    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err(crate::SchedulerError::Validation(format!(
            "URL '{}' must not contain embedded credentials",
            url_str
        ))
        .into());
    }

    Ok(())
}
