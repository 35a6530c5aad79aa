//! Implementations of the capability interface.
//!
//! - [`rest`]: the Azure Queue service over HTTPS
//! - [`memory`]: an in-process emulation for tests and local development

pub mod memory;
pub mod rest;
pub mod xml;

pub use memory::{MemoryConnector, MemoryQueueService};
pub use rest::{RestConnector, RestQueueService};
