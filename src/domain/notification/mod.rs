mod idempotency;
mod types;

pub use idempotency::idempotency_key;
pub use types::{
    Channel, EnqueueResult, NotificationLog, NotificationStatus, Payload, RecipientRole,
    SendNotificationRequest,
};
