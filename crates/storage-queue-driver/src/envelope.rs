//! Message envelope types and the codec between wire records and jobs.
//!
//! The remote service stores message bodies as text. Structured payloads are
//! serialized to JSON on the way in and parsed back on the way out; text that
//! does not parse as JSON is handed back unchanged. Decoding never fails.

use crate::error::{SerializationError, ValidationError};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;

// ============================================================================
// Identifiers
// ============================================================================

/// Message identifier assigned by the remote service at enqueue time
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "message_id".to_string(),
            });
        }

        Ok(Self(s.to_string()))
    }
}

/// Opaque token proving the holder currently leases a message
///
/// Required to delete or update a received message. The service invalidates
/// it when the message is received again, updated, or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PopReceipt(String);

impl PopReceipt {
    /// Get receipt as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PopReceipt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PopReceipt {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "pop_receipt".to_string(),
            });
        }

        Ok(Self(s.to_string()))
    }
}

// ============================================================================
// Payload
// ============================================================================

/// Caller data carried by a message
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    /// Structured data, JSON-encoded on the wire
    Json(serde_json::Value),
    /// Text that is sent as-is and did not parse as JSON on the way back
    Text(String),
}

impl Payload {
    /// Build a structured payload from any serializable value
    pub fn json<T: Serialize>(value: &T) -> Result<Self, SerializationError> {
        Ok(Self::Json(serde_json::to_value(value)?))
    }

    /// Encode payload into the text stored by the service
    pub fn encode(&self) -> Result<String, SerializationError> {
        match self {
            Self::Json(value) => Ok(serde_json::to_string(value)?),
            Self::Text(text) => Ok(text.clone()),
        }
    }

    /// Decode text stored by the service.
    ///
    /// Text that parses as JSON comes back as [`Payload::Json`], anything else
    /// as [`Payload::Text`] holding the original string.
    pub fn decode(text: &str) -> Self {
        match serde_json::from_str::<serde_json::Value>(text) {
            Ok(value) => Self::Json(value),
            Err(_) => Self::Text(text.to_string()),
        }
    }

    /// Deserialize a structured payload into a typed value
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, SerializationError> {
        match self {
            Self::Json(value) => Ok(T::deserialize(value)?),
            Self::Text(_) => Err(SerializationError::NotStructured),
        }
    }

    /// Get the raw text when the payload did not parse as JSON
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Json(_) => None,
        }
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

// ============================================================================
// Wire Record
// ============================================================================

/// Message record as returned by the remote service
///
/// Send, receive, peek and update responses each fill a different subset of
/// these fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteMessage {
    pub message_id: String,
    pub message_text: Option<String>,
    /// Raw response body, used when the service did not echo message text
    pub raw_body: Option<String>,
    pub inserted_on: Option<DateTime<Utc>>,
    pub expires_on: Option<DateTime<Utc>>,
    pub next_visible_on: Option<DateTime<Utc>>,
    pub pop_receipt: Option<String>,
    pub dequeue_count: Option<u32>,
}

// ============================================================================
// Job
// ============================================================================

/// Normalized queue message handed to callers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: MessageId,
    pub receipt: Option<PopReceipt>,
    pub payload: Option<Payload>,
    /// Next-visible time in epoch milliseconds, 0 when unknown
    pub run_at: i64,
    pub delayed: bool,
    pub dequeue_count: Option<u32>,
    pub expires_on: Option<DateTime<Utc>>,
    progress: f64,
}

impl Job {
    /// Latest progress reported for this job
    pub fn progress(&self) -> f64 {
        self.progress
    }

    /// Record progress. Kept in memory only, the service never sees it.
    pub fn report_progress(&mut self, progress: f64) {
        self.progress = progress;
    }

    /// Check whether this record holds a lease on the message
    pub fn is_leased(&self) -> bool {
        self.receipt.is_some()
    }
}

/// Convert a wire record returned by send, receive or update into a job
pub fn decode_message(message: RemoteMessage) -> Job {
    let text = message.message_text.or(message.raw_body);
    let payload = text.as_deref().map(Payload::decode);

    let run_at = message
        .next_visible_on
        .map(|t| t.timestamp_millis())
        .unwrap_or(0);
    let delayed = message.inserted_on != message.next_visible_on;

    // An empty id from a malformed record still yields a job; the service
    // will reject it on delete.
    let id = MessageId(message.message_id);
    let receipt = message
        .pop_receipt
        .filter(|r| !r.is_empty())
        .map(PopReceipt);

    Job {
        id,
        receipt,
        payload,
        run_at,
        delayed,
        dequeue_count: message.dequeue_count,
        expires_on: message.expires_on,
        progress: 0.0,
    }
}

/// Convert a peeked wire record into a job that never holds a lease
pub fn decode_peeked(message: RemoteMessage) -> Job {
    let mut job = decode_message(message);
    job.receipt = None;
    job
}
