//! Storage traits for the delivery subsystem.
//!
//! Three repositories sit behind `async_trait` seams so memory and
//! PostgreSQL implementations are interchangeable: the notification log
//! store, the versioned template rows and the preference rows.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::notification::{Channel, NotificationLog, RecipientRole};
use crate::domain::preference::{NotificationCategory, NotificationPolicy};
use crate::domain::template::TemplateButton;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Unique-constraint violation on the idempotency key; the caller
    /// should resolve to the existing row
    #[error("Duplicate idempotency key: {0}")]
    DuplicateKey(String),

    /// PostgreSQL operation failed
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored value could not be decoded into a domain type
    #[error("Invalid stored value: {0}")]
    Invalid(String),
}

/// Persistence for notification log rows.
///
/// Implementations enforce uniqueness on the idempotency key and must be
/// thread-safe; multiple worker executors update different rows
/// concurrently.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Insert a fresh row. Fails with `StoreError::DuplicateKey` when a
    /// row with the same idempotency key already exists.
    async fn insert(&self, log: NotificationLog) -> Result<NotificationLog, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<NotificationLog>, StoreError>;

    async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<NotificationLog>, StoreError>;

    /// Row-level update by id; the full row is written back.
    async fn update(&self, log: &NotificationLog) -> Result<(), StoreError>;

    /// Failed rows, oldest first, up to `limit`.
    async fn find_failed(&self, limit: usize) -> Result<Vec<NotificationLog>, StoreError>;
}

/// A versioned template row.
#[derive(Debug, Clone)]
pub struct StoredTemplate {
    pub template_key: String,
    pub channel: Channel,
    pub body: String,
    pub buttons: Vec<TemplateButton>,
    pub version: String,
    pub policy_version: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Lookup of versioned template rows.
#[async_trait]
pub trait TemplateRepository: Send + Sync {
    /// The most recently created active row for the key/channel pair,
    /// or `None` when no active row exists.
    async fn find_active(
        &self,
        template_key: &str,
        channel: Channel,
    ) -> Result<Option<StoredTemplate>, StoreError>;
}

/// Lookup of policy, user-preference and role-default rows.
#[async_trait]
pub trait PreferenceRepository: Send + Sync {
    async fn find_policy(
        &self,
        template_key: &str,
    ) -> Result<Option<NotificationPolicy>, StoreError>;

    /// User-level preference for a category/channel pair; `Some(enabled)`
    /// when a row exists.
    async fn find_user_preference(
        &self,
        user_id: &str,
        category: NotificationCategory,
        channel: Channel,
    ) -> Result<Option<bool>, StoreError>;

    /// Role-level default for a category/channel pair.
    async fn find_role_default(
        &self,
        role: RecipientRole,
        category: NotificationCategory,
        channel: Channel,
    ) -> Result<Option<bool>, StoreError>;
}
