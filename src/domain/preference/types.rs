//! Preference data models

use serde::{Deserialize, Serialize};

use crate::domain::notification::{Channel, RecipientRole};

/// Category a template's notifications belong to.
///
/// Every category except `Marketing` is enabled at the system-fallback
/// tier; marketing is strictly opt-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationCategory {
    #[default]
    Transactional,
    Reminder,
    Security,
    Marketing,
}

impl NotificationCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationCategory::Transactional => "TRANSACTIONAL",
            NotificationCategory::Reminder => "REMINDER",
            NotificationCategory::Security => "SECURITY",
            NotificationCategory::Marketing => "MARKETING",
        }
    }

    /// System fallback when no policy, user preference or role default
    /// applies.
    pub fn enabled_by_default(&self) -> bool {
        !matches!(self, NotificationCategory::Marketing)
    }
}

impl std::str::FromStr for NotificationCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TRANSACTIONAL" => Ok(NotificationCategory::Transactional),
            "REMINDER" => Ok(NotificationCategory::Reminder),
            "SECURITY" => Ok(NotificationCategory::Security),
            "MARKETING" => Ok(NotificationCategory::Marketing),
            other => Err(format!("unknown category: {}", other)),
        }
    }
}

/// System-level policy for a template key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPolicy {
    pub template_key: String,
    pub category: NotificationCategory,
    /// When true, delivery bypasses all user/role preferences
    pub force_deliver: bool,
    /// Channels this template may be delivered on
    pub allowed_channels: Vec<Channel>,
}

/// Why a preference decision came out the way it did.
///
/// Machine-readable; persisted as `skip_reason` on skipped rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PreferenceReason {
    ForceDeliver,
    ChannelNotAllowed,
    UserPrefEnabled,
    UserPrefDisabled,
    RoleDefaultEnabled,
    RoleDefaultDisabled,
    SystemFallbackEnabled,
    SystemFallbackDisabled,
}

impl PreferenceReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            PreferenceReason::ForceDeliver => "FORCE_DELIVER",
            PreferenceReason::ChannelNotAllowed => "CHANNEL_NOT_ALLOWED",
            PreferenceReason::UserPrefEnabled => "USER_PREF_ENABLED",
            PreferenceReason::UserPrefDisabled => "USER_PREF_DISABLED",
            PreferenceReason::RoleDefaultEnabled => "ROLE_DEFAULT_ENABLED",
            PreferenceReason::RoleDefaultDisabled => "ROLE_DEFAULT_DISABLED",
            PreferenceReason::SystemFallbackEnabled => "SYSTEM_FALLBACK_ENABLED",
            PreferenceReason::SystemFallbackDisabled => "SYSTEM_FALLBACK_DISABLED",
        }
    }
}

impl std::fmt::Display for PreferenceReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a preference resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PreferenceDecision {
    pub enabled: bool,
    pub reason: PreferenceReason,
}

impl PreferenceDecision {
    pub fn new(enabled: bool, reason: PreferenceReason) -> Self {
        Self { enabled, reason }
    }
}

/// One resolution request, used by `batch_resolve`.
#[derive(Debug, Clone)]
pub struct PreferenceRequest {
    pub user_id: String,
    pub role: RecipientRole,
    pub template_key: String,
    pub channel: Channel,
}
