//! Delivery job queue boundary.
//!
//! The durable queue engine is an external collaborator; this module
//! defines the integration surface the service and worker pool depend on,
//! plus an in-process implementation.

mod memory;

pub use memory::MemoryQueue;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Payload of one delivery job.
///
/// Only the notification id travels through the queue; the worker loads
/// everything else from the store, which keeps jobs small and replay-safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryJob {
    pub notification_id: Uuid,
}

impl DeliveryJob {
    pub fn new(notification_id: Uuid) -> Self {
        Self { notification_id }
    }
}

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue no longer accepts jobs (receiver side gone)
    #[error("Delivery queue is closed")]
    Closed,
}

/// Queue surface used by the service (submission) and the worker pool
/// (intake and delayed retry resubmission).
#[async_trait]
pub trait DeliveryQueue: Send + Sync {
    /// Submit a job for immediate execution. Submissions for a
    /// notification id that is already pending may be coalesced.
    async fn submit(&self, job: DeliveryJob) -> Result<(), QueueError>;

    /// Submit a job to run after `delay`. The pool uses this to translate
    /// transient failures into scheduled retries.
    async fn submit_delayed(&self, job: DeliveryJob, delay: Duration) -> Result<(), QueueError>;

    /// Receive the next job; `None` once the queue is closed and drained.
    async fn recv(&self) -> Option<DeliveryJob>;
}
