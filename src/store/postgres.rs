//! PostgreSQL store backends.
//!
//! Notification rows survive process restarts and the unique index on
//! `idempotency_key` arbitrates concurrent enqueues.
//!
//! Table structure:
//! - `notification_logs` - one row per logical notification attempt-series,
//!   unique index on `idempotency_key`
//! - `message_templates` - versioned template rows with an `is_active` flag
//! - `notification_policies` - per-template-key system policies
//! - `user_channel_preferences` - user-level (category, channel) opt-ins
//! - `role_channel_defaults` - role-level (category, channel) defaults

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::domain::notification::{Channel, NotificationLog, NotificationStatus, RecipientRole};
use crate::domain::preference::{NotificationCategory, NotificationPolicy};
use crate::domain::template::TemplateButton;

use super::{
    NotificationStore, PreferenceRepository, StoreError, StoredTemplate, TemplateRepository,
};

/// PostgreSQL-backed notification log store.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_log(row: &PgRow) -> Result<NotificationLog, StoreError> {
    let channel: String = row.try_get("channel")?;
    let status: String = row.try_get("status")?;
    let payload: serde_json::Value = row.try_get("payload")?;
    let payload = payload
        .as_object()
        .cloned()
        .ok_or_else(|| StoreError::Invalid("payload is not a JSON object".to_string()))?;
    let attempt_count: i32 = row.try_get("attempt_count")?;

    Ok(NotificationLog {
        id: row.try_get("id")?,
        idempotency_key: row.try_get("idempotency_key")?,
        event_name: row.try_get("event_name")?,
        recipient_id: row.try_get("recipient_id")?,
        recipient_chat_id: row.try_get("recipient_chat_id")?,
        channel: channel.parse().map_err(StoreError::Invalid)?,
        template_key: row.try_get("template_key")?,
        payload,
        status: status.parse().map_err(StoreError::Invalid)?,
        attempt_count: attempt_count.max(0) as u32,
        last_attempt_at: row.try_get("last_attempt_at")?,
        next_retry_at: row.try_get("next_retry_at")?,
        sent_at: row.try_get("sent_at")?,
        provider_message_id: row.try_get("provider_message_id")?,
        error_message: row.try_get("error_message")?,
        skip_reason: row.try_get("skip_reason")?,
        template_version: row.try_get("template_version")?,
        template_snapshot: row.try_get("template_snapshot")?,
        policy_version: row.try_get("policy_version")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl NotificationStore for PgStore {
    async fn insert(&self, log: NotificationLog) -> Result<NotificationLog, StoreError> {
        let payload = serde_json::Value::Object(log.payload.clone());
        let result = sqlx::query(
            r#"
            INSERT INTO notification_logs (
                id, idempotency_key, event_name, recipient_id, recipient_chat_id,
                channel, template_key, payload, status, attempt_count,
                last_attempt_at, next_retry_at, sent_at, provider_message_id,
                error_message, skip_reason, template_version, template_snapshot,
                policy_version, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                    $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
            "#,
        )
        .bind(log.id)
        .bind(&log.idempotency_key)
        .bind(&log.event_name)
        .bind(&log.recipient_id)
        .bind(log.recipient_chat_id)
        .bind(log.channel.as_str())
        .bind(&log.template_key)
        .bind(&payload)
        .bind(log.status.as_str())
        .bind(log.attempt_count as i32)
        .bind(log.last_attempt_at)
        .bind(log.next_retry_at)
        .bind(log.sent_at)
        .bind(&log.provider_message_id)
        .bind(&log.error_message)
        .bind(&log.skip_reason)
        .bind(&log.template_version)
        .bind(&log.template_snapshot)
        .bind(&log.policy_version)
        .bind(log.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(log),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::DuplicateKey(log.idempotency_key))
            }
            Err(e) => Err(StoreError::Postgres(e)),
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<NotificationLog>, StoreError> {
        let row = sqlx::query("SELECT * FROM notification_logs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_log).transpose()
    }

    async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<NotificationLog>, StoreError> {
        let row = sqlx::query("SELECT * FROM notification_logs WHERE idempotency_key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_log).transpose()
    }

    async fn update(&self, log: &NotificationLog) -> Result<(), StoreError> {
        let payload = serde_json::Value::Object(log.payload.clone());
        sqlx::query(
            r#"
            UPDATE notification_logs SET
                status = $2,
                attempt_count = $3,
                last_attempt_at = $4,
                next_retry_at = $5,
                sent_at = $6,
                provider_message_id = $7,
                error_message = $8,
                skip_reason = $9,
                template_version = $10,
                template_snapshot = $11,
                policy_version = $12,
                payload = $13
            WHERE id = $1
            "#,
        )
        .bind(log.id)
        .bind(log.status.as_str())
        .bind(log.attempt_count as i32)
        .bind(log.last_attempt_at)
        .bind(log.next_retry_at)
        .bind(log.sent_at)
        .bind(&log.provider_message_id)
        .bind(&log.error_message)
        .bind(&log.skip_reason)
        .bind(&log.template_version)
        .bind(&log.template_snapshot)
        .bind(&log.policy_version)
        .bind(&payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_failed(&self, limit: usize) -> Result<Vec<NotificationLog>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM notification_logs
            WHERE status = 'FAILED'
            ORDER BY created_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_log).collect()
    }
}

/// PostgreSQL-backed template rows.
pub struct PgTemplateRepository {
    pool: PgPool,
}

impl PgTemplateRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TemplateRepository for PgTemplateRepository {
    async fn find_active(
        &self,
        template_key: &str,
        channel: Channel,
    ) -> Result<Option<StoredTemplate>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT template_key, channel, body, buttons, version, policy_version,
                   is_active, created_at
            FROM message_templates
            WHERE template_key = $1 AND channel = $2 AND is_active = TRUE
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(template_key)
        .bind(channel.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let row = match row {
            Some(row) => row,
            None => return Ok(None),
        };

        let channel: String = row.try_get("channel")?;
        let buttons: serde_json::Value = row.try_get("buttons")?;
        let buttons: Vec<TemplateButton> = serde_json::from_value(buttons)?;

        Ok(Some(StoredTemplate {
            template_key: row.try_get("template_key")?,
            channel: channel.parse().map_err(StoreError::Invalid)?,
            body: row.try_get("body")?,
            buttons,
            version: row.try_get("version")?,
            policy_version: row.try_get("policy_version")?,
            is_active: row.try_get("is_active")?,
            created_at: row.try_get("created_at")?,
        }))
    }
}

/// PostgreSQL-backed preference rows.
pub struct PgPreferenceRepository {
    pool: PgPool,
}

impl PgPreferenceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PreferenceRepository for PgPreferenceRepository {
    async fn find_policy(
        &self,
        template_key: &str,
    ) -> Result<Option<NotificationPolicy>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT template_key, category, force_deliver, allowed_channels
            FROM notification_policies
            WHERE template_key = $1
            "#,
        )
        .bind(template_key)
        .fetch_optional(&self.pool)
        .await?;

        let row = match row {
            Some(row) => row,
            None => return Ok(None),
        };

        let category: String = row.try_get("category")?;
        let allowed: Vec<String> = row.try_get("allowed_channels")?;
        let allowed_channels = allowed
            .iter()
            .map(|c| c.parse().map_err(StoreError::Invalid))
            .collect::<Result<Vec<Channel>, StoreError>>()?;

        Ok(Some(NotificationPolicy {
            template_key: row.try_get("template_key")?,
            category: category.parse().map_err(StoreError::Invalid)?,
            force_deliver: row.try_get("force_deliver")?,
            allowed_channels,
        }))
    }

    async fn find_user_preference(
        &self,
        user_id: &str,
        category: NotificationCategory,
        channel: Channel,
    ) -> Result<Option<bool>, StoreError> {
        let enabled: Option<bool> = sqlx::query_scalar(
            r#"
            SELECT enabled FROM user_channel_preferences
            WHERE user_id = $1 AND category = $2 AND channel = $3
            "#,
        )
        .bind(user_id)
        .bind(category.as_str())
        .bind(channel.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(enabled)
    }

    async fn find_role_default(
        &self,
        role: RecipientRole,
        category: NotificationCategory,
        channel: Channel,
    ) -> Result<Option<bool>, StoreError> {
        let enabled: Option<bool> = sqlx::query_scalar(
            r#"
            SELECT enabled FROM role_channel_defaults
            WHERE role = $1 AND category = $2 AND channel = $3
            "#,
        )
        .bind(role.as_str())
        .bind(category.as_str())
        .bind(channel.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(enabled)
    }
}
