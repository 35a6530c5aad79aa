//! Queue driver contract consumed by a host queue manager.

use crate::envelope::{Job, MessageId, Payload, PopReceipt};
use crate::error::DriverError;
use crate::service::{
    Acknowledgement, MessageUpdate, PeekOptions, QueueProperties, ReceiveOptions, RequestOptions,
    StoreOptions, UpdateReceipt,
};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

#[cfg(test)]
#[path = "driver_tests.rs"]
mod tests;

/// Callback a push-style driver would invoke per job
pub type JobHandler = Arc<dyn Fn(Job) + Send + Sync>;

/// Jobs returned by a receive or peek
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Delivery {
    /// Exactly one message came back
    Single(Job),
    /// Several messages came back
    Batch(Vec<Job>),
}

impl Delivery {
    /// Wrap jobs, `None` when there are none
    pub fn from_jobs(mut jobs: Vec<Job>) -> Option<Self> {
        match jobs.len() {
            0 => None,
            1 => jobs.pop().map(Self::Single),
            _ => Some(Self::Batch(jobs)),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Batch(jobs) => jobs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flatten into a list of jobs
    pub fn into_jobs(self) -> Vec<Job> {
        match self {
            Self::Single(job) => vec![job],
            Self::Batch(jobs) => jobs,
        }
    }
}

/// Operations a queue driver offers to the host
#[async_trait]
pub trait QueueDriver: Send + Sync {
    /// Name of the queue this driver operates on
    fn name(&self) -> &str;

    /// Read properties of the bound queue
    async fn queue_properties(
        &self,
        options: &RequestOptions,
    ) -> Result<QueueProperties, DriverError>;

    /// Enqueue a payload
    async fn store(&self, payload: Payload, options: &StoreOptions) -> Result<Job, DriverError>;

    /// Receive and lease the next message(s); `None` when the queue is empty
    async fn get_next(&self, options: &ReceiveOptions) -> Result<Option<Delivery>, DriverError>;

    /// Look at the next message(s) without leasing them
    async fn peek_next(&self, options: &PeekOptions) -> Result<Option<Delivery>, DriverError>;

    /// Delete a leased message
    async fn remove(
        &self,
        message_id: &MessageId,
        receipt: &PopReceipt,
        options: &RequestOptions,
    ) -> Result<Acknowledgement, DriverError>;

    /// Change content and/or visibility of a leased message
    async fn update(
        &self,
        message_id: &MessageId,
        receipt: &PopReceipt,
        update: MessageUpdate,
        options: &RequestOptions,
    ) -> Result<UpdateReceipt, DriverError>;

    /// Delete every message in the queue
    async fn clear(&self, options: &RequestOptions) -> Result<Acknowledgement, DriverError>;

    /// Drop the queue handle; the next operation rebuilds it
    async fn close(&self);

    /// Push-style consumption
    fn process(&self, handler: JobHandler) -> Result<(), DriverError>;
}
