//! Wire format of the query service.
//!
//! A query goes out as one text frame holding a [`QueryRequest`]. The answer
//! comes back as a sequence of frames, each a [`ResponseBatch`]; the
//! [`Countdown`] decides which frame is the last one.

use crate::row::RawRow;
use crate::{Result, SockqlError};
use serde::{Deserialize, Serialize};

/// Message type of an outgoing query.
pub const SQL_QUERY: &str = "SQL_QUERY";

/// Message type the service uses to reject a query.
pub const ERROR_MESSAGE: &str = "ERROR";

/// Result cache policy requested from the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReadCache {
    /// Always execute; never answer from cache
    #[default]
    #[serde(rename = "NONE")]
    NoCache,
    /// Let the service decide
    Default,
    /// Only answer from cache
    Require,
}

/// Billing/attribution tag attached to a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub value: String,
}

impl Tag {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Query envelope, serialized as one text frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub message_type: String,
    pub sql: String,
    pub request_id: String,
    pub read_cache: ReadCache,
    pub tags: Vec<Tag>,
}

impl QueryRequest {
    /// Creates a `SQL_QUERY` envelope with no tags and caching off.
    pub fn new(sql: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            message_type: SQL_QUERY.to_string(),
            sql: sql.into(),
            request_id: request_id.into(),
            read_cache: ReadCache::NoCache,
            tags: Vec::new(),
        }
    }

    pub fn with_read_cache(mut self, read_cache: ReadCache) -> Self {
        self.read_cache = read_cache;
        self
    }

    pub fn with_tags(mut self, tags: Vec<Tag>) -> Self {
        self.tags = tags;
        self
    }

    /// Serializes the envelope for the wire.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// One decoded response frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResponseBatch {
    pub message_type: String,
    pub request_id: String,
    pub batch_serial: i64,
    pub total_batches: i64,
    pub split_serial: i64,
    pub total_split_serials: i64,
    pub cache_info: Option<String>,
    pub sub_batch_serial: i64,
    /// Sub-batches still to come; `<= 0` marks the end of the stream
    pub total_sub_batches: i64,
    pub data: Vec<RawRow>,
    /// Error text on `ERROR` messages
    #[serde(alias = "logMessage", alias = "error", skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ResponseBatch {
    /// Decodes one frame.
    ///
    /// # Errors
    ///
    /// Returns [`SockqlError::ProtocolError`] if the frame is not a JSON
    /// object of the expected shape.
    pub fn decode(frame: &[u8]) -> Result<Self> {
        serde_json::from_slice(frame).map_err(|e| SockqlError::ProtocolError {
            reason: format!("undecodable response frame ({} bytes)", frame.len()),
            source: Some(e),
        })
    }

    /// Whether the service rejected the query with this message.
    pub fn is_error(&self) -> bool {
        self.message_type.eq_ignore_ascii_case(ERROR_MESSAGE)
    }
}

/// Tracks how many sub-batches are still outstanding.
///
/// Seeded from the first message's `totalSubBatches`; every later message
/// counts down by one. The stream ends when the count reaches zero or when a
/// message itself reports zero (or less) remaining.
///
/// `totalSubBatches` is read as the number of messages still to come after
/// the current one, not as a total: a first message reporting `3` is
/// followed by three more.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Countdown {
    remaining: Option<i64>,
    received: usize,
}

impl Countdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one message; returns `true` if it was the terminal one.
    pub fn observe(&mut self, total_sub_batches: i64) -> bool {
        self.received += 1;

        if total_sub_batches <= 0 {
            self.remaining = Some(0);
            return true;
        }

        let remaining = match self.remaining {
            None => total_sub_batches,
            Some(r) => r - 1,
        };
        self.remaining = Some(remaining.max(0));
        remaining <= 0
    }

    /// Messages observed so far.
    pub fn received(&self) -> usize {
        self.received
    }

    /// Outstanding count; `None` before the first message.
    pub fn remaining(&self) -> Option<i64> {
        self.remaining
    }
}
