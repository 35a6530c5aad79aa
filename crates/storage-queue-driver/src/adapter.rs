//! Azure Storage queue driver.
//!
//! [`StorageQueueDriver`] binds one named queue to the host's driver contract.
//! Nothing touches the network at construction. The first operation connects
//! to the service, builds the queue handle and makes sure the queue exists;
//! both handles are then reused. `close` drops only the queue handle.

use crate::config::{DriverConfig, EnvironmentCredentials};
use crate::driver::{Delivery, JobHandler, QueueDriver};
use crate::envelope::{decode_message, decode_peeked, Job, MessageId, Payload, PopReceipt};
use crate::error::{ConfigurationError, DriverError, RemoteServiceError};
use crate::service::{
    Acknowledgement, CreateQueueOptions, ListQueuesOptions, MessageUpdate, PeekOptions,
    QueueDescriptor, QueueName, QueueProperties, QueueService, QueueTransport, ReceiveOptions,
    RequestOptions, SendOptions, ServiceConnector, StoreOptions, UpdateReceipt,
};
use crate::transport::RestConnector;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "adapter_tests.rs"]
mod tests;

/// Queue driver backed by the Azure Queue service
pub struct StorageQueueDriver {
    config: DriverConfig,
    connector: Arc<dyn ServiceConnector>,
    service: RwLock<Option<Arc<dyn QueueService>>>,
    queue: RwLock<Option<Arc<dyn QueueTransport>>>,
}

impl StorageQueueDriver {
    /// Create driver talking to the REST service.
    ///
    /// Credential environment variables are read once, here; the connection
    /// itself is resolved on first use.
    pub fn new(config: DriverConfig) -> Self {
        let connector = RestConnector::new(config.config.clone(), EnvironmentCredentials::from_env());
        Self::with_connector(config, Arc::new(connector))
    }

    /// Create driver over a custom connector
    pub fn with_connector(config: DriverConfig, connector: Arc<dyn ServiceConnector>) -> Self {
        Self {
            config,
            connector,
            service: RwLock::new(None),
            queue: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Service handle, connecting on first use
    pub async fn client(&self) -> Result<Arc<dyn QueueService>, DriverError> {
        {
            let service = self.service.read().await;
            if let Some(service) = service.as_ref() {
                return Ok(Arc::clone(service));
            }
        }

        let mut slot = self.service.write().await;

        // Another task may have connected while we waited
        if let Some(service) = slot.as_ref() {
            return Ok(Arc::clone(service));
        }

        let service = self.connector.connect()?;
        info!(driver = %self.config.driver, "Connected to queue service");
        *slot = Some(Arc::clone(&service));

        Ok(service)
    }

    /// Queue handle, creating the queue if it is missing on first use
    async fn queue_client(&self) -> Result<Arc<dyn QueueTransport>, DriverError> {
        {
            let queue = self.queue.read().await;
            if let Some(queue) = queue.as_ref() {
                return Ok(Arc::clone(queue));
            }
        }

        let mut slot = self.queue.write().await;

        if let Some(queue) = slot.as_ref() {
            return Ok(Arc::clone(queue));
        }

        let name: QueueName =
            self.config
                .name
                .parse()
                .map_err(|e| ConfigurationError::Invalid {
                    message: format!("Queue name '{}': {}", self.config.name, e),
                })?;

        let queue = self.client().await?.queue_client(&name);
        let created = queue.create_if_not_exists(&RequestOptions::default()).await?;
        info!(queue = %queue.queue_name(), created, "Queue handle ready");
        *slot = Some(Arc::clone(&queue));

        Ok(queue)
    }

    /// List every queue in the account, following continuation markers
    pub async fn list_queues(
        &self,
        options: &ListQueuesOptions,
    ) -> Result<Vec<QueueDescriptor>, DriverError> {
        bounded("list_queues", &options.request, async {
            let service = self.client().await?;
            let mut queues = Vec::new();
            let mut marker: Option<String> = None;

            loop {
                let segment = service
                    .list_queues_segment(options, marker.as_deref())
                    .await?;
                queues.extend(segment.queues);
                match segment.next_marker {
                    Some(next) => marker = Some(next),
                    None => break,
                }
            }

            debug!(count = queues.len(), "Listed queues");
            Ok(queues)
        })
        .await
    }

    /// Create a queue in the account
    pub async fn create_queue(
        &self,
        name: &str,
        options: &CreateQueueOptions,
    ) -> Result<Acknowledgement, DriverError> {
        let name: QueueName = name.parse()?;
        bounded("create_queue", &options.request, async {
            let ack = self.client().await?.create_queue(&name, options).await?;
            debug!(queue = %name, "Created queue");
            Ok(ack)
        })
        .await
    }

    /// Delete a queue from the account
    pub async fn delete_queue(
        &self,
        name: &str,
        options: &RequestOptions,
    ) -> Result<Acknowledgement, DriverError> {
        let name: QueueName = name.parse()?;
        bounded("delete_queue", options, async {
            let ack = self.client().await?.delete_queue(&name, options).await?;
            debug!(queue = %name, "Deleted queue");
            Ok(ack)
        })
        .await
    }
}

impl std::fmt::Debug for StorageQueueDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageQueueDriver")
            .field("config", &self.config)
            .field("connector", &self.connector)
            .finish_non_exhaustive()
    }
}

/// Run `operation` within the request deadline, if one is set
async fn bounded<T, F>(
    operation: &'static str,
    options: &RequestOptions,
    future: F,
) -> Result<T, DriverError>
where
    F: Future<Output = Result<T, DriverError>>,
{
    let Some(limit) = options.timeout else {
        return future.await;
    };

    match tokio::time::timeout(limit.to_std().unwrap_or_default(), future).await {
        Ok(result) => result,
        Err(_) => Err(RemoteServiceError::Timeout {
            operation,
            duration: limit,
        }
        .into()),
    }
}

/// Initial invisibility for a message due at `run_at` epoch milliseconds
fn delay_until(run_at: i64) -> Duration {
    let delay = Duration::milliseconds(run_at - Utc::now().timestamp_millis());
    if delay < Duration::zero() {
        warn!(run_at, "run_at is in the past, storing message as immediately visible");
        return Duration::zero();
    }
    delay
}

#[async_trait]
impl QueueDriver for StorageQueueDriver {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn queue_properties(
        &self,
        options: &RequestOptions,
    ) -> Result<QueueProperties, DriverError> {
        bounded("queue_properties", options, async {
            self.queue_client().await?.properties(options).await
        })
        .await
    }

    async fn store(&self, payload: Payload, options: &StoreOptions) -> Result<Job, DriverError> {
        let text = payload.encode()?;
        let send = SendOptions {
            visibility_timeout: options.run_at.map(delay_until),
            time_to_live: options.time_to_live,
            request: options.request.clone(),
        };

        bounded("store", &options.request, async {
            let queue = self.queue_client().await?;
            let job = decode_message(queue.send_message(&text, &send).await?);
            debug!(queue = %queue.queue_name(), message_id = %job.id, delayed = job.delayed, "Stored message");
            Ok(job)
        })
        .await
    }

    async fn get_next(&self, options: &ReceiveOptions) -> Result<Option<Delivery>, DriverError> {
        bounded("get_next", &options.request, async {
            let queue = self.queue_client().await?;
            let messages = queue.receive_messages(options).await?;
            debug!(queue = %queue.queue_name(), count = messages.len(), "Received messages");
            Ok(Delivery::from_jobs(
                messages.into_iter().map(decode_message).collect(),
            ))
        })
        .await
    }

    async fn peek_next(&self, options: &PeekOptions) -> Result<Option<Delivery>, DriverError> {
        bounded("peek_next", &options.request, async {
            let queue = self.queue_client().await?;
            let messages = queue.peek_messages(options).await?;
            debug!(queue = %queue.queue_name(), count = messages.len(), "Peeked messages");
            Ok(Delivery::from_jobs(
                messages.into_iter().map(decode_peeked).collect(),
            ))
        })
        .await
    }

    async fn remove(
        &self,
        message_id: &MessageId,
        receipt: &PopReceipt,
        options: &RequestOptions,
    ) -> Result<Acknowledgement, DriverError> {
        bounded("remove", options, async {
            let queue = self.queue_client().await?;
            let ack = queue.delete_message(message_id, receipt, options).await?;
            debug!(queue = %queue.queue_name(), message_id = %message_id, "Removed message");
            Ok(ack)
        })
        .await
    }

    async fn update(
        &self,
        message_id: &MessageId,
        receipt: &PopReceipt,
        update: MessageUpdate,
        options: &RequestOptions,
    ) -> Result<UpdateReceipt, DriverError> {
        bounded("update", options, async {
            let queue = self.queue_client().await?;
            let result = queue
                .update_message(message_id, receipt, &update, options)
                .await?;
            debug!(queue = %queue.queue_name(), message_id = %message_id, "Updated message");
            Ok(result)
        })
        .await
    }

    async fn clear(&self, options: &RequestOptions) -> Result<Acknowledgement, DriverError> {
        bounded("clear", options, async {
            let queue = self.queue_client().await?;
            let ack = queue.clear_messages(options).await?;
            debug!(queue = %queue.queue_name(), "Cleared queue");
            Ok(ack)
        })
        .await
    }

    async fn close(&self) {
        self.queue.write().await.take();
        debug!(queue = %self.config.name, "Closed queue handle");
    }

    fn process(&self, _handler: JobHandler) -> Result<(), DriverError> {
        Err(DriverError::NotImplemented {
            operation: "process",
        })
    }
}
