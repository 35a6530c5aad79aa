//! # Storage Queue Driver
//!
//! Azure Storage Queue driver for hosts that manage pluggable queue backends.
//!
//! This library provides:
//! - A [`QueueDriver`] contract with store, receive, peek, remove, update and
//!   clear operations on one named queue
//! - [`StorageQueueDriver`], which connects lazily and creates its queue on
//!   first use
//! - Connection resolution from connection strings, shared keys or the
//!   default Azure credential chain
//! - A REST transport and an in-memory transport behind the same interface
//! - A [`DriverRegistry`] mapping driver keys to factories
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all driver operations
//! - [`config`] - Driver configuration and credential environment
//! - [`connection`] - Authentication strategy and endpoint resolution
//! - [`envelope`] - Jobs, payloads and the wire record codec
//! - [`service`] - Capability interface to the remote service
//! - [`transport`] - REST and in-memory implementations
//! - [`driver`] - Driver contract
//! - [`adapter`] - Azure Storage driver
//! - [`registry`] - Named driver factories
//!
//! ## Example
//!
//! ```no_run
//! use storage_queue_driver::{
//!     DriverConfig, Payload, QueueDriver, ReceiveOptions, StorageConfig, StorageQueueDriver,
//!     StoreOptions,
//! };
//!
//! # async fn example() -> Result<(), storage_queue_driver::DriverError> {
//! let config = DriverConfig::new(
//!     "orders",
//!     StorageConfig::from_connection_string("UseDevelopmentStorage=true"),
//! );
//! let driver = StorageQueueDriver::new(config);
//!
//! driver
//!     .store(Payload::from(serde_json::json!({"order": 42})), &StoreOptions::new())
//!     .await?;
//!
//! if let Some(delivery) = driver.get_next(&ReceiveOptions::new()).await? {
//!     for job in delivery.into_jobs() {
//!         if let Some(receipt) = &job.receipt {
//!             driver.remove(&job.id, receipt, &Default::default()).await?;
//!         }
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod config;
pub mod connection;
pub mod driver;
pub mod envelope;
pub mod error;
pub mod registry;
pub mod service;
pub mod transport;

// Re-export commonly used types at crate root for convenience
pub use adapter::StorageQueueDriver;
pub use crate::config::{DriverConfig, EnvironmentCredentials, StorageConfig, AZURE_STORAGE_DRIVER};
pub use connection::{AuthStrategy, ConnectionResolver, ServiceEndpoint, StorageCredential};
pub use driver::{Delivery, JobHandler, QueueDriver};
pub use envelope::{Job, MessageId, Payload, PopReceipt, RemoteMessage};
pub use error::{
    ConfigurationError, DriverError, RemoteServiceError, SerializationError, ValidationError,
};
pub use registry::{DriverFactory, DriverRegistry, MEMORY_DRIVER};
pub use service::{
    Acknowledgement, CreateQueueOptions, ListQueuesOptions, MessageUpdate, PeekOptions,
    QueueDescriptor, QueueName, QueueProperties, QueueService, QueueTransport, ReceiveOptions,
    RequestOptions, ServiceConnector, StoreOptions, UpdateReceipt,
};
pub use transport::{MemoryConnector, MemoryQueueService, RestConnector};
