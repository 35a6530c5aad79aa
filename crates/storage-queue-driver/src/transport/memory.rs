//! In-memory queue service for testing and development.
//!
//! Emulates the parts of the remote service the driver relies on:
//! - Queue existence and metadata conflicts
//! - Visibility windows and message TTL
//! - A fresh pop receipt per receive and update, with receipt checks
//! - Service limits on visibility timeouts and batch sizes
//!
//! Errors carry the same HTTP status and error codes the real service uses.

use crate::envelope::{MessageId, PopReceipt, RemoteMessage};
use crate::error::{DriverError, RemoteServiceError};
use crate::service::{
    Acknowledgement, CreateQueueOptions, ListQueuesOptions, MessageUpdate, PeekOptions,
    QueueDescriptor, QueueName, QueueProperties, QueueSegment, QueueService, QueueTransport,
    ReceiveOptions, RequestOptions, SendOptions, ServiceConnector, UpdateReceipt,
    MAX_MESSAGES_PER_REQUEST, MAX_VISIBILITY_TIMEOUT_SECS,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

/// Lease granted by a receive without an explicit visibility timeout
const DEFAULT_RECEIVE_VISIBILITY_SECS: i64 = 30;

/// Message lifetime when no TTL is given
const DEFAULT_TIME_TO_LIVE_SECS: i64 = 7 * 24 * 60 * 60;

// ============================================================================
// Internal Storage Structures
// ============================================================================

#[derive(Default)]
struct MemoryState {
    queues: BTreeMap<QueueName, MemoryQueue>,
}

impl MemoryState {
    fn queue_mut(&mut self, name: &QueueName) -> Result<&mut MemoryQueue, DriverError> {
        let queue = self
            .queues
            .get_mut(name)
            .ok_or_else(|| service_error(404, "QueueNotFound", "The specified queue does not exist."))?;
        queue.purge_expired(Utc::now());
        Ok(queue)
    }
}

#[derive(Default)]
struct MemoryQueue {
    metadata: HashMap<String, String>,
    /// Messages in insertion order
    messages: Vec<StoredMessage>,
}

impl MemoryQueue {
    fn purge_expired(&mut self, now: DateTime<Utc>) {
        self.messages.retain(|m| m.expires_on > now);
    }

    fn leased_mut(
        &mut self,
        message_id: &MessageId,
        receipt: &PopReceipt,
    ) -> Result<&mut StoredMessage, DriverError> {
        let message = self
            .messages
            .iter_mut()
            .find(|m| m.id == message_id.as_str())
            .ok_or_else(|| service_error(404, "MessageNotFound", "The specified message does not exist."))?;

        if message.pop_receipt != receipt.as_str() {
            return Err(service_error(
                400,
                "PopReceiptMismatch",
                "The specified pop receipt did not match the pop receipt for a dequeued message.",
            ));
        }

        Ok(message)
    }
}

struct StoredMessage {
    id: String,
    text: String,
    inserted_on: DateTime<Utc>,
    expires_on: DateTime<Utc>,
    next_visible_on: DateTime<Utc>,
    pop_receipt: String,
    dequeue_count: u32,
}

impl StoredMessage {
    fn is_visible(&self, now: DateTime<Utc>) -> bool {
        self.next_visible_on <= now
    }

    fn lease(&mut self, now: DateTime<Utc>, visibility: Duration) {
        self.pop_receipt = new_receipt();
        self.next_visible_on = now + visibility;
    }

    fn to_remote(&self) -> RemoteMessage {
        RemoteMessage {
            message_id: self.id.clone(),
            message_text: Some(self.text.clone()),
            raw_body: None,
            inserted_on: Some(self.inserted_on),
            expires_on: Some(self.expires_on),
            next_visible_on: Some(self.next_visible_on),
            pop_receipt: Some(self.pop_receipt.clone()),
            dequeue_count: Some(self.dequeue_count),
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn service_error(status: u16, code: &str, message: &str) -> DriverError {
    RemoteServiceError::service(status, code, message).into()
}

fn new_receipt() -> String {
    Uuid::new_v4().simple().to_string()
}

fn acknowledgement() -> Acknowledgement {
    Acknowledgement {
        request_id: Some(Uuid::new_v4().to_string()),
        date: Some(Utc::now()),
    }
}

fn check_visibility(visibility: Duration) -> Result<Duration, DriverError> {
    if visibility < Duration::zero() || visibility > Duration::seconds(MAX_VISIBILITY_TIMEOUT_SECS)
    {
        return Err(service_error(
            400,
            "OutOfRangeQueryParameterValue",
            "visibilitytimeout must be between 0 seconds and 7 days.",
        ));
    }
    Ok(visibility)
}

fn check_count(count: Option<u32>) -> Result<usize, DriverError> {
    let count = count.unwrap_or(1);
    if count == 0 || count > MAX_MESSAGES_PER_REQUEST {
        return Err(service_error(
            400,
            "OutOfRangeQueryParameterValue",
            "numofmessages must be between 1 and 32.",
        ));
    }
    Ok(count as usize)
}

// ============================================================================
// Connector and Service
// ============================================================================

/// Connector handing out one shared in-memory service
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    service: MemoryQueueService,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connector backed by an existing service, sharing its queues
    pub fn with_service(service: MemoryQueueService) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &MemoryQueueService {
        &self.service
    }
}

impl ServiceConnector for MemoryConnector {
    fn connect(&self) -> Result<Arc<dyn QueueService>, DriverError> {
        Ok(Arc::new(self.service.clone()))
    }
}

/// In-memory queue service; clones share the same queues
#[derive(Clone, Default)]
pub struct MemoryQueueService {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryQueueService {
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for MemoryQueueService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryQueueService").finish_non_exhaustive()
    }
}

#[async_trait]
impl QueueService for MemoryQueueService {
    async fn list_queues_segment(
        &self,
        options: &ListQueuesOptions,
        marker: Option<&str>,
    ) -> Result<QueueSegment, DriverError> {
        let state = self.state.lock().await;
        let prefix = options.prefix.as_deref().unwrap_or("");
        let page_size = options.page_size.unwrap_or(5000).max(1) as usize;

        let mut matching = state
            .queues
            .iter()
            .filter(|(name, _)| name.as_str().starts_with(prefix))
            .filter(|(name, _)| marker.map_or(true, |m| name.as_str() >= m));

        let queues = matching
            .by_ref()
            .take(page_size)
            .map(|(name, queue)| QueueDescriptor {
                name: name.to_string(),
                metadata: if options.include_metadata {
                    queue.metadata.clone()
                } else {
                    HashMap::new()
                },
            })
            .collect();
        let next_marker = matching.next().map(|(name, _)| name.to_string());

        Ok(QueueSegment {
            queues,
            next_marker,
        })
    }

    async fn create_queue(
        &self,
        queue: &QueueName,
        options: &CreateQueueOptions,
    ) -> Result<Acknowledgement, DriverError> {
        let mut state = self.state.lock().await;
        match state.queues.get(queue) {
            Some(existing) if existing.metadata != options.metadata => Err(service_error(
                409,
                "QueueAlreadyExists",
                "The specified queue already exists.",
            )),
            Some(_) => Ok(acknowledgement()),
            None => {
                state.queues.insert(
                    queue.clone(),
                    MemoryQueue {
                        metadata: options.metadata.clone(),
                        messages: Vec::new(),
                    },
                );
                Ok(acknowledgement())
            }
        }
    }

    async fn delete_queue(
        &self,
        queue: &QueueName,
        _options: &RequestOptions,
    ) -> Result<Acknowledgement, DriverError> {
        let mut state = self.state.lock().await;
        state
            .queues
            .remove(queue)
            .map(|_| acknowledgement())
            .ok_or_else(|| service_error(404, "QueueNotFound", "The specified queue does not exist."))
    }

    fn queue_client(&self, queue: &QueueName) -> Arc<dyn QueueTransport> {
        Arc::new(MemoryQueueClient {
            queue: queue.clone(),
            state: Arc::clone(&self.state),
        })
    }
}

// ============================================================================
// Queue Client
// ============================================================================

/// In-memory handle for a single queue
pub struct MemoryQueueClient {
    queue: QueueName,
    state: Arc<Mutex<MemoryState>>,
}

impl std::fmt::Debug for MemoryQueueClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryQueueClient")
            .field("queue", &self.queue)
            .finish()
    }
}

#[async_trait]
impl QueueTransport for MemoryQueueClient {
    fn queue_name(&self) -> &QueueName {
        &self.queue
    }

    async fn create_if_not_exists(&self, _options: &RequestOptions) -> Result<bool, DriverError> {
        let mut state = self.state.lock().await;
        if state.queues.contains_key(&self.queue) {
            return Ok(false);
        }
        state.queues.insert(self.queue.clone(), MemoryQueue::default());
        Ok(true)
    }

    async fn properties(&self, _options: &RequestOptions) -> Result<QueueProperties, DriverError> {
        let mut state = self.state.lock().await;
        let queue = state.queue_mut(&self.queue)?;
        Ok(QueueProperties {
            approximate_message_count: queue.messages.len() as u64,
            metadata: queue.metadata.clone(),
        })
    }

    async fn send_message(
        &self,
        message_text: &str,
        options: &SendOptions,
    ) -> Result<RemoteMessage, DriverError> {
        let visibility = check_visibility(options.visibility_timeout.unwrap_or_else(Duration::zero))?;
        let ttl = options
            .time_to_live
            .unwrap_or_else(|| Duration::seconds(DEFAULT_TIME_TO_LIVE_SECS));
        if ttl <= Duration::zero() || visibility > ttl {
            return Err(service_error(
                400,
                "OutOfRangeQueryParameterValue",
                "messagettl must be positive and not shorter than visibilitytimeout.",
            ));
        }

        let mut state = self.state.lock().await;
        let queue = state.queue_mut(&self.queue)?;

        let now = Utc::now();
        let message = StoredMessage {
            id: Uuid::new_v4().to_string(),
            text: message_text.to_string(),
            inserted_on: now,
            expires_on: now + ttl,
            next_visible_on: now + visibility,
            pop_receipt: new_receipt(),
            dequeue_count: 0,
        };

        // The service does not echo the text back on send
        let record = RemoteMessage {
            message_text: None,
            dequeue_count: None,
            ..message.to_remote()
        };
        queue.messages.push(message);

        Ok(record)
    }

    async fn receive_messages(
        &self,
        options: &ReceiveOptions,
    ) -> Result<Vec<RemoteMessage>, DriverError> {
        let count = check_count(options.number_of_messages)?;
        let visibility = check_visibility(
            options
                .visibility_timeout
                .unwrap_or_else(|| Duration::seconds(DEFAULT_RECEIVE_VISIBILITY_SECS)),
        )?;

        let mut state = self.state.lock().await;
        let queue = state.queue_mut(&self.queue)?;

        let now = Utc::now();
        Ok(queue
            .messages
            .iter_mut()
            .filter(|m| m.is_visible(now))
            .take(count)
            .map(|message| {
                message.lease(now, visibility);
                message.dequeue_count += 1;
                message.to_remote()
            })
            .collect())
    }

    async fn peek_messages(
        &self,
        options: &PeekOptions,
    ) -> Result<Vec<RemoteMessage>, DriverError> {
        let count = check_count(options.number_of_messages)?;

        let mut state = self.state.lock().await;
        let queue = state.queue_mut(&self.queue)?;

        let now = Utc::now();
        Ok(queue
            .messages
            .iter()
            .filter(|m| m.is_visible(now))
            .take(count)
            .map(|message| RemoteMessage {
                pop_receipt: None,
                next_visible_on: None,
                ..message.to_remote()
            })
            .collect())
    }

    async fn delete_message(
        &self,
        message_id: &MessageId,
        receipt: &PopReceipt,
        _options: &RequestOptions,
    ) -> Result<Acknowledgement, DriverError> {
        let mut state = self.state.lock().await;
        let queue = state.queue_mut(&self.queue)?;

        queue.leased_mut(message_id, receipt)?;
        queue.messages.retain(|m| m.id != message_id.as_str());

        Ok(acknowledgement())
    }

    async fn update_message(
        &self,
        message_id: &MessageId,
        receipt: &PopReceipt,
        update: &MessageUpdate,
        _options: &RequestOptions,
    ) -> Result<UpdateReceipt, DriverError> {
        let visibility = check_visibility(update.visibility_timeout.unwrap_or_else(Duration::zero))?;

        let mut state = self.state.lock().await;
        let queue = state.queue_mut(&self.queue)?;
        let message = queue.leased_mut(message_id, receipt)?;

        if let Some(text) = &update.message_text {
            message.text = text.clone();
        }
        message.lease(Utc::now(), visibility);

        let new_receipt: PopReceipt = message.pop_receipt.parse()?;
        Ok(UpdateReceipt {
            receipt: new_receipt,
            next_visible_on: Some(message.next_visible_on),
            acknowledgement: acknowledgement(),
        })
    }

    async fn clear_messages(
        &self,
        _options: &RequestOptions,
    ) -> Result<Acknowledgement, DriverError> {
        let mut state = self.state.lock().await;
        state.queue_mut(&self.queue)?.messages.clear();
        Ok(acknowledgement())
    }
}
