//! In-memory store backends using DashMap.
//!
//! State is lost on restart; these back unit and integration tests and
//! single-process deployments.

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use crate::domain::notification::{Channel, NotificationLog, NotificationStatus, RecipientRole};
use crate::domain::preference::{NotificationCategory, NotificationPolicy};

use super::{
    NotificationStore, PreferenceRepository, StoreError, StoredTemplate, TemplateRepository,
};

/// In-memory notification log store.
///
/// A secondary index maps idempotency keys to row ids so uniqueness is
/// enforced the same way the Postgres unique index does.
pub struct MemoryStore {
    rows: DashMap<Uuid, NotificationLog>,
    key_index: DashMap<String, Uuid>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            rows: DashMap::new(),
            key_index: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn insert(&self, log: NotificationLog) -> Result<NotificationLog, StoreError> {
        // entry() keeps the check-and-insert atomic under concurrent sends
        match self.key_index.entry(log.idempotency_key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(StoreError::DuplicateKey(log.idempotency_key.clone()))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(log.id);
                self.rows.insert(log.id, log.clone());
                Ok(log)
            }
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<NotificationLog>, StoreError> {
        Ok(self.rows.get(&id).map(|r| r.clone()))
    }

    async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<NotificationLog>, StoreError> {
        let id = match self.key_index.get(key) {
            Some(id) => *id,
            None => return Ok(None),
        };
        Ok(self.rows.get(&id).map(|r| r.clone()))
    }

    async fn update(&self, log: &NotificationLog) -> Result<(), StoreError> {
        match self.rows.get_mut(&log.id) {
            Some(mut row) => {
                *row = log.clone();
                Ok(())
            }
            None => Err(StoreError::Invalid(format!(
                "update of missing row {}",
                log.id
            ))),
        }
    }

    async fn find_failed(&self, limit: usize) -> Result<Vec<NotificationLog>, StoreError> {
        let mut failed: Vec<NotificationLog> = self
            .rows
            .iter()
            .filter(|r| r.status == NotificationStatus::Failed)
            .map(|r| r.clone())
            .collect();
        failed.sort_by_key(|r| r.created_at);
        failed.truncate(limit);
        Ok(failed)
    }
}

/// In-memory template rows, keyed by template key.
pub struct MemoryTemplateRepository {
    rows: DashMap<String, Vec<StoredTemplate>>,
}

impl Default for MemoryTemplateRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTemplateRepository {
    pub fn new() -> Self {
        Self {
            rows: DashMap::new(),
        }
    }

    pub fn put(&self, template: StoredTemplate) {
        self.rows
            .entry(template.template_key.clone())
            .or_default()
            .push(template);
    }
}

#[async_trait]
impl TemplateRepository for MemoryTemplateRepository {
    async fn find_active(
        &self,
        template_key: &str,
        channel: Channel,
    ) -> Result<Option<StoredTemplate>, StoreError> {
        let rows = match self.rows.get(template_key) {
            Some(rows) => rows,
            None => return Ok(None),
        };
        Ok(rows
            .iter()
            .filter(|t| t.channel == channel && t.is_active)
            .max_by_key(|t| t.created_at)
            .cloned())
    }
}

/// In-memory preference rows.
pub struct MemoryPreferenceRepository {
    policies: DashMap<String, NotificationPolicy>,
    user_prefs: DashMap<(String, NotificationCategory, Channel), bool>,
    role_defaults: DashMap<(RecipientRole, NotificationCategory, Channel), bool>,
}

impl Default for MemoryPreferenceRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPreferenceRepository {
    pub fn new() -> Self {
        Self {
            policies: DashMap::new(),
            user_prefs: DashMap::new(),
            role_defaults: DashMap::new(),
        }
    }

    pub fn put_policy(&self, policy: NotificationPolicy) {
        self.policies.insert(policy.template_key.clone(), policy);
    }

    pub fn put_user_preference(
        &self,
        user_id: &str,
        category: NotificationCategory,
        channel: Channel,
        enabled: bool,
    ) {
        self.user_prefs
            .insert((user_id.to_string(), category, channel), enabled);
    }

    pub fn put_role_default(
        &self,
        role: RecipientRole,
        category: NotificationCategory,
        channel: Channel,
        enabled: bool,
    ) {
        self.role_defaults.insert((role, category, channel), enabled);
    }
}

#[async_trait]
impl PreferenceRepository for MemoryPreferenceRepository {
    async fn find_policy(
        &self,
        template_key: &str,
    ) -> Result<Option<NotificationPolicy>, StoreError> {
        Ok(self.policies.get(template_key).map(|p| p.clone()))
    }

    async fn find_user_preference(
        &self,
        user_id: &str,
        category: NotificationCategory,
        channel: Channel,
    ) -> Result<Option<bool>, StoreError> {
        Ok(self
            .user_prefs
            .get(&(user_id.to_string(), category, channel))
            .map(|v| *v))
    }

    async fn find_role_default(
        &self,
        role: RecipientRole,
        category: NotificationCategory,
        channel: Channel,
    ) -> Result<Option<bool>, StoreError> {
        Ok(self.role_defaults.get(&(role, category, channel)).map(|v| *v))
    }
}
