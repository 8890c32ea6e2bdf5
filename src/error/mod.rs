use thiserror::Error;

use crate::queue::QueueError;
use crate::store::StoreError;

/// Top-level error for enqueue-side operations.
///
/// Delivery-classification failures (permanent/transient send failures,
/// missing templates, missing providers) never surface here: the worker
/// resolves them against the notification row. Only hard dependency
/// failures propagate to callers.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

pub type Result<T> = std::result::Result<T, ServiceError>;
