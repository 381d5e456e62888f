//! Input validation for query text, tags, and endpoints.
//!
//! Everything here runs before any network I/O so that bad input fails with
//! [`SockqlError::InvalidInput`] instead of a confusing service error.

use crate::protocol::Tag;
use crate::{Result, SockqlError};
use url::Url;

/// Maximum accepted SQL text size in bytes.
///
/// WebSocket APIs cap frames well below this; larger payloads would be
/// rejected by the service anyway.
pub const MAX_SQL_LENGTH: usize = 128 * 1024;

/// Maximum length for tag names, tag values and request ids.
const MAX_FIELD_LENGTH: usize = 255;

/// Validates SQL text before it is wrapped in a request envelope.
///
/// Rejects empty or whitespace-only text, null bytes, and oversized input.
///
/// # Example
///
/// ```
/// use sockql::validation::validate_sql;
///
/// assert!(validate_sql("SELECT 1").is_ok());
/// assert!(validate_sql("   ").is_err());
/// assert!(validate_sql("SELECT '\0'").is_err());
/// ```
pub fn validate_sql(sql: &str) -> Result<()> {
    if sql.trim().is_empty() {
        return Err(SockqlError::InvalidInput("sql cannot be empty".to_string()));
    }

    if sql.len() > MAX_SQL_LENGTH {
        return Err(SockqlError::InvalidInput(format!(
            "sql exceeds maximum length of {} bytes",
            MAX_SQL_LENGTH
        )));
    }

    if sql.contains('\0') {
        return Err(SockqlError::InvalidInput("sql contains null byte".to_string()));
    }

    Ok(())
}

/// Validates a billing/attribution tag.
pub fn validate_tag(tag: &Tag) -> Result<()> {
    if tag.name.is_empty() {
        return Err(SockqlError::InvalidInput("tag name cannot be empty".to_string()));
    }
    check_field("tag name", &tag.name)?;
    check_field("tag value", &tag.value)
}

/// Validates a caller-supplied correlation id.
pub fn validate_request_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(SockqlError::InvalidInput("request id cannot be empty".to_string()));
    }
    check_field("request id", id)
}

/// Validates the base connection URL: `ws://` or `wss://` with a host.
pub fn validate_endpoint(endpoint: &str) -> Result<Url> {
    let url = Url::parse(endpoint)
        .map_err(|e| SockqlError::InvalidInput(format!("endpoint is not a URL: {}", e)))?;

    if url.scheme() != "wss" && url.scheme() != "ws" {
        return Err(SockqlError::InvalidInput(format!(
            "endpoint scheme must be ws or wss, got {}",
            url.scheme()
        )));
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(SockqlError::InvalidInput("endpoint has no host".to_string()));
    }

    Ok(url)
}

fn check_field(what: &str, value: &str) -> Result<()> {
    if value.len() > MAX_FIELD_LENGTH {
        return Err(SockqlError::InvalidInput(format!(
            "{} exceeds maximum length of {} characters",
            what, MAX_FIELD_LENGTH
        )));
    }

    if value.chars().any(|c| c.is_control()) {
        return Err(SockqlError::InvalidInput(format!(
            "{} contains control characters",
            what
        )));
    }

    Ok(())
}
