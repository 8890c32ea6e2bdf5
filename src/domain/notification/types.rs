use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Template variables stored verbatim on the notification row.
///
/// `serde_json`'s default map is BTree-backed, so serialization order is
/// stable regardless of insertion order. The idempotency hash relies on this.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Messaging channels the subsystem can deliver on.
///
/// Closed set; the worker resolves a provider per channel from a lookup
/// table built at startup. A channel without a registered provider fails
/// permanently at delivery time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Channel {
    Telegram,
    Email,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Telegram => "TELEGRAM",
            Channel::Email => "EMAIL",
        }
    }
}

impl std::str::FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TELEGRAM" => Ok(Channel::Telegram),
            "EMAIL" => Ok(Channel::Email),
            other => Err(format!("unknown channel: {}", other)),
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of the notification recipient, used for role-level preference
/// defaults. `User` is the least-privileged role and the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecipientRole {
    #[default]
    User,
    Operator,
    Admin,
}

impl RecipientRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecipientRole::User => "USER",
            RecipientRole::Operator => "OPERATOR",
            RecipientRole::Admin => "ADMIN",
        }
    }
}

impl std::str::FromStr for RecipientRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "USER" => Ok(RecipientRole::User),
            "OPERATOR" => Ok(RecipientRole::Operator),
            "ADMIN" => Ok(RecipientRole::Admin),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// Lifecycle status of a notification row.
///
/// `Sent` and `Skipped` are terminal. `Failed` is terminal only when
/// `next_retry_at` is cleared; a transiently failed row keeps a
/// `next_retry_at` and is eligible for redelivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
    Skipped,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Pending => "PENDING",
            NotificationStatus::Sent => "SENT",
            NotificationStatus::Failed => "FAILED",
            NotificationStatus::Skipped => "SKIPPED",
        }
    }
}

impl std::str::FromStr for NotificationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(NotificationStatus::Pending),
            "SENT" => Ok(NotificationStatus::Sent),
            "FAILED" => Ok(NotificationStatus::Failed),
            "SKIPPED" => Ok(NotificationStatus::Skipped),
            other => Err(format!("unknown status: {}", other)),
        }
    }
}

/// One row per logical notification attempt-series.
///
/// Created by the enqueue path as `Pending` or `Skipped`; mutated only by
/// the delivery worker afterwards. Never deleted by this subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationLog {
    pub id: Uuid,
    /// Deterministic hash of the identity fields; unique in the store
    pub idempotency_key: String,
    pub event_name: String,
    pub recipient_id: String,
    pub recipient_chat_id: i64,
    pub channel: Channel,
    pub template_key: String,
    pub payload: Payload,
    pub status: NotificationStatus,
    /// Incremented once per delivery attempt, never decremented
    pub attempt_count: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Non-null only while transiently FAILED
    pub next_retry_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub provider_message_id: Option<String>,
    pub error_message: Option<String>,
    /// Set only when status is SKIPPED
    pub skip_reason: Option<String>,
    /// Captured at enqueue time for audit even if the template later changes
    pub template_version: Option<String>,
    pub template_snapshot: Option<String>,
    pub policy_version: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NotificationLog {
    /// Build a fresh row from an enqueue request.
    pub fn from_request(
        request: &SendNotificationRequest,
        idempotency_key: String,
        status: NotificationStatus,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            idempotency_key,
            event_name: request.event_name.clone(),
            recipient_id: request.recipient_id.clone(),
            recipient_chat_id: request.recipient_chat_id,
            channel: request.channel,
            template_key: request.template_key.clone(),
            payload: request.variables.clone(),
            status,
            attempt_count: 0,
            last_attempt_at: None,
            next_retry_at: None,
            sent_at: None,
            provider_message_id: None,
            error_message: None,
            skip_reason: None,
            template_version: None,
            template_snapshot: None,
            policy_version: None,
            created_at: Utc::now(),
        }
    }
}

/// Request to enqueue one logical notification on one channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendNotificationRequest {
    pub event_name: String,
    pub recipient_id: String,
    /// Channel-specific delivery target
    pub recipient_chat_id: i64,
    pub channel: Channel,
    pub template_key: String,
    #[serde(default)]
    pub variables: Payload,
    #[serde(default)]
    pub recipient_role: RecipientRole,
}

/// Outcome of an enqueue call.
#[derive(Debug, Clone, Serialize)]
pub struct EnqueueResult {
    pub notification_id: Uuid,
    /// True when an existing row with the same idempotency key absorbed
    /// the request; nothing was created and no job was queued
    pub deduplicated: bool,
    /// True when preferences disabled delivery and a SKIPPED row was
    /// written for audit
    pub skipped: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> SendNotificationRequest {
        let mut variables = Payload::new();
        variables.insert("name".to_string(), json!("Alice"));
        SendNotificationRequest {
            event_name: "booking.created".to_string(),
            recipient_id: "u1".to_string(),
            recipient_chat_id: 42,
            channel: Channel::Telegram,
            template_key: "t1".to_string(),
            variables,
            recipient_role: RecipientRole::default(),
        }
    }

    #[test]
    fn test_from_request_initial_state() {
        let log =
            NotificationLog::from_request(&request(), "k".to_string(), NotificationStatus::Pending);
        assert_eq!(log.status, NotificationStatus::Pending);
        assert_eq!(log.attempt_count, 0);
        assert!(log.next_retry_at.is_none());
        assert!(log.sent_at.is_none());
        assert_eq!(log.payload["name"], json!("Alice"));
    }

    #[test]
    fn test_default_role_is_least_privileged() {
        assert_eq!(RecipientRole::default(), RecipientRole::User);
    }

    #[test]
    fn test_channel_round_trip() {
        assert_eq!("TELEGRAM".parse::<Channel>().unwrap(), Channel::Telegram);
        assert_eq!(Channel::Email.as_str(), "EMAIL");
        assert!("SMS".parse::<Channel>().is_err());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            NotificationStatus::Pending,
            NotificationStatus::Sent,
            NotificationStatus::Failed,
            NotificationStatus::Skipped,
        ] {
            assert_eq!(status.as_str().parse::<NotificationStatus>().unwrap(), status);
        }
    }
}
