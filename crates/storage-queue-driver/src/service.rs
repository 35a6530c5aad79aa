//! Capability interface to the remote queue service.
//!
//! The driver never talks HTTP directly. It reaches the service through a
//! [`ServiceConnector`] that yields a [`QueueService`] (account-level
//! operations) and, from it, one [`QueueTransport`] per queue.

use crate::envelope::{MessageId, Payload, PopReceipt, RemoteMessage};
use crate::error::{DriverError, SerializationError, ValidationError};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;

/// Longest visibility timeout the service accepts, in seconds (7 days)
pub const MAX_VISIBILITY_TIMEOUT_SECS: i64 = 7 * 24 * 60 * 60;

/// Most messages a single receive or peek may return
pub const MAX_MESSAGES_PER_REQUEST: u32 = 32;

// ============================================================================
// Queue Name
// ============================================================================

/// Validated queue name following the storage service naming rules
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueueName(String);

impl QueueName {
    /// Create new queue name with validation
    pub fn new(name: String) -> Result<Self, ValidationError> {
        if name.len() < 3 || name.len() > 63 {
            return Err(ValidationError::OutOfRange {
                field: "queue_name".to_string(),
                message: "must be 3-63 characters".to_string(),
            });
        }

        if !name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "only lowercase ASCII letters, digits, and hyphens allowed".to_string(),
            });
        }

        if name.starts_with('-') || name.ends_with('-') || name.contains("--") {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "no leading/trailing hyphens or consecutive hyphens".to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Get queue name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

// ============================================================================
// Operation Options
// ============================================================================

/// Options shared by every remote call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Deadline for the whole call, also forwarded to the service
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    /// Create new request options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the call deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Options for listing queues
#[derive(Debug, Clone, Default)]
pub struct ListQueuesOptions {
    /// Only list queues whose name starts with this prefix
    pub prefix: Option<String>,
    /// Return queue metadata alongside names
    pub include_metadata: bool,
    /// Maximum queues per page fetched from the service
    pub page_size: Option<u32>,
    pub request: RequestOptions,
}

impl ListQueuesOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_metadata(mut self) -> Self {
        self.include_metadata = true;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }
}

/// Options for creating a queue
#[derive(Debug, Clone, Default)]
pub struct CreateQueueOptions {
    pub metadata: HashMap<String, String>,
    pub request: RequestOptions,
}

impl CreateQueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Options for enqueueing through the driver
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    /// Epoch milliseconds at which the message becomes visible
    pub run_at: Option<i64>,
    /// How long the service keeps the message before expiring it
    pub time_to_live: Option<Duration>,
    pub request: RequestOptions,
}

impl StoreOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver no earlier than the given epoch milliseconds
    pub fn with_run_at(mut self, run_at: i64) -> Self {
        self.run_at = Some(run_at);
        self
    }

    /// Deliver no earlier than the given instant
    pub fn with_run_at_time(mut self, run_at: DateTime<Utc>) -> Self {
        self.run_at = Some(run_at.timestamp_millis());
        self
    }

    pub fn with_time_to_live(mut self, ttl: Duration) -> Self {
        self.time_to_live = Some(ttl);
        self
    }
}

/// Transport-level send options
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Initial invisibility of the message
    pub visibility_timeout: Option<Duration>,
    pub time_to_live: Option<Duration>,
    pub request: RequestOptions,
}

/// Options for receiving messages
#[derive(Debug, Clone, Default)]
pub struct ReceiveOptions {
    /// Number of messages to receive, 1 when unset
    pub number_of_messages: Option<u32>,
    /// Lease duration, the service default (30 seconds) when unset
    pub visibility_timeout: Option<Duration>,
    pub request: RequestOptions,
}

impl ReceiveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_number_of_messages(mut self, count: u32) -> Self {
        self.number_of_messages = Some(count);
        self
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = Some(timeout);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request.timeout = Some(timeout);
        self
    }
}

/// Options for peeking at messages
#[derive(Debug, Clone, Default)]
pub struct PeekOptions {
    /// Number of messages to peek, 1 when unset
    pub number_of_messages: Option<u32>,
    pub request: RequestOptions,
}

impl PeekOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_number_of_messages(mut self, count: u32) -> Self {
        self.number_of_messages = Some(count);
        self
    }
}

/// Changes applied by an update
#[derive(Debug, Clone, Default)]
pub struct MessageUpdate {
    /// Replacement text; the content is left unchanged when unset
    pub message_text: Option<String>,
    /// New visibility timeout relative to service time, 0 when unset
    pub visibility_timeout: Option<Duration>,
}

impl MessageUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the content with an encoded payload
    pub fn with_payload(mut self, payload: &Payload) -> Result<Self, SerializationError> {
        self.message_text = Some(payload.encode()?);
        Ok(self)
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = Some(timeout);
        self
    }
}

// ============================================================================
// Responses
// ============================================================================

/// Acknowledgment of a completed remote call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Acknowledgement {
    pub request_id: Option<String>,
    pub date: Option<DateTime<Utc>>,
}

/// Queue entry returned by a listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueDescriptor {
    pub name: String,
    pub metadata: HashMap<String, String>,
}

/// One page of a queue listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueSegment {
    pub queues: Vec<QueueDescriptor>,
    /// Continuation marker, `None` on the last page
    pub next_marker: Option<String>,
}

/// Properties of a queue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueProperties {
    /// Approximate number of messages, including invisible ones
    pub approximate_message_count: u64,
    pub metadata: HashMap<String, String>,
}

/// Result of updating a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateReceipt {
    /// Receipt replacing the one used for the update
    pub receipt: PopReceipt,
    pub next_visible_on: Option<DateTime<Utc>>,
    pub acknowledgement: Acknowledgement,
}

// ============================================================================
// Capability Traits
// ============================================================================

/// Produces the account-level service handle
pub trait ServiceConnector: Send + Sync + fmt::Debug {
    /// Build a service handle; called at most once per driver until it succeeds
    fn connect(&self) -> Result<Arc<dyn QueueService>, DriverError>;
}

/// Account-level queue service operations
#[async_trait]
pub trait QueueService: Send + Sync + fmt::Debug {
    /// Fetch one page of the queue listing
    async fn list_queues_segment(
        &self,
        options: &ListQueuesOptions,
        marker: Option<&str>,
    ) -> Result<QueueSegment, DriverError>;

    /// Create a queue
    async fn create_queue(
        &self,
        queue: &QueueName,
        options: &CreateQueueOptions,
    ) -> Result<Acknowledgement, DriverError>;

    /// Delete a queue and all its messages
    async fn delete_queue(
        &self,
        queue: &QueueName,
        options: &RequestOptions,
    ) -> Result<Acknowledgement, DriverError>;

    /// Handle for operations on a single queue
    fn queue_client(&self, queue: &QueueName) -> Arc<dyn QueueTransport>;
}

/// Operations on a single queue
#[async_trait]
pub trait QueueTransport: Send + Sync + fmt::Debug {
    /// Name of the queue this handle addresses
    fn queue_name(&self) -> &QueueName;

    /// Create the queue unless it exists; returns whether it was created
    async fn create_if_not_exists(&self, options: &RequestOptions) -> Result<bool, DriverError>;

    /// Read queue properties
    async fn properties(&self, options: &RequestOptions) -> Result<QueueProperties, DriverError>;

    /// Enqueue message text
    async fn send_message(
        &self,
        message_text: &str,
        options: &SendOptions,
    ) -> Result<RemoteMessage, DriverError>;

    /// Receive and lease messages
    async fn receive_messages(
        &self,
        options: &ReceiveOptions,
    ) -> Result<Vec<RemoteMessage>, DriverError>;

    /// Read messages without leasing them
    async fn peek_messages(&self, options: &PeekOptions)
        -> Result<Vec<RemoteMessage>, DriverError>;

    /// Delete a leased message
    async fn delete_message(
        &self,
        message_id: &MessageId,
        receipt: &PopReceipt,
        options: &RequestOptions,
    ) -> Result<Acknowledgement, DriverError>;

    /// Change content or visibility of a leased message
    async fn update_message(
        &self,
        message_id: &MessageId,
        receipt: &PopReceipt,
        update: &MessageUpdate,
        options: &RequestOptions,
    ) -> Result<UpdateReceipt, DriverError>;

    /// Delete every message in the queue
    async fn clear_messages(&self, options: &RequestOptions)
        -> Result<Acknowledgement, DriverError>;
}
