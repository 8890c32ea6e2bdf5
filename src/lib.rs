// Infrastructure layer (shared components)
pub mod config;
pub mod error;
pub mod metrics;
pub mod telemetry;

// Domain layer (business logic)
pub mod domain;

// Application layer
pub mod channel;
pub mod queue;
pub mod service;
pub mod store;
pub mod worker;

// Re-export the types most callers need
pub use domain::notification::{
    Channel, EnqueueResult, NotificationLog, NotificationStatus, RecipientRole,
    SendNotificationRequest,
};
pub use error::{Result, ServiceError};
pub use service::NotificationService;
pub use worker::{DeliveryOutcome, DeliveryWorker};
