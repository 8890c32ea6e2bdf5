//! Four-tier preference resolution with short-circuiting.
//!
//! Order: policy force-deliver, policy channel allow-list, user preference,
//! role default, system fallback. First match wins; `force_deliver`
//! suppresses every later lookup.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::notification::{Channel, RecipientRole};
use crate::metrics::{PREFERENCE_CACHE_HITS_TOTAL, PREFERENCE_CACHE_MISSES_TOTAL};
use crate::store::{PreferenceRepository, StoreError};

use super::cache::TtlCache;
use super::types::{
    NotificationCategory, NotificationPolicy, PreferenceDecision, PreferenceReason,
    PreferenceRequest,
};

/// Both caches share this TTL unless one is injected with another.
pub const DEFAULT_PREFERENCE_CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RoleDefaultKey {
    role: RecipientRole,
    category: NotificationCategory,
    channel: Channel,
}

/// Resolves whether a (user, role, template, channel) tuple may be
/// delivered to.
pub struct PreferenceResolver {
    repo: Arc<dyn PreferenceRepository>,
    policy_cache: TtlCache<String, Option<NotificationPolicy>>,
    role_cache: TtlCache<RoleDefaultKey, Option<bool>>,
}

impl PreferenceResolver {
    pub fn new(repo: Arc<dyn PreferenceRepository>) -> Self {
        Self::with_cache_ttl(repo, DEFAULT_PREFERENCE_CACHE_TTL)
    }

    pub fn with_cache_ttl(repo: Arc<dyn PreferenceRepository>, ttl: Duration) -> Self {
        Self {
            repo,
            policy_cache: TtlCache::new(ttl),
            role_cache: TtlCache::new(ttl),
        }
    }

    /// Resolve a single preference decision.
    #[tracing::instrument(name = "preferences.is_channel_enabled", skip(self))]
    pub async fn is_channel_enabled(
        &self,
        user_id: &str,
        role: RecipientRole,
        template_key: &str,
        channel: Channel,
    ) -> Result<PreferenceDecision, StoreError> {
        // Tier 1: system policy
        let policy = self.load_policy(template_key).await?;

        if let Some(ref policy) = policy {
            if policy.force_deliver {
                // User/role preferences are intentionally never consulted
                return Ok(PreferenceDecision::new(true, PreferenceReason::ForceDeliver));
            }
            if !policy.allowed_channels.contains(&channel) {
                return Ok(PreferenceDecision::new(
                    false,
                    PreferenceReason::ChannelNotAllowed,
                ));
            }
        }

        let category = policy
            .as_ref()
            .map(|p| p.category)
            .unwrap_or(NotificationCategory::Transactional);

        // Tier 2: user-level preference
        if let Some(enabled) = self
            .repo
            .find_user_preference(user_id, category, channel)
            .await?
        {
            let reason = if enabled {
                PreferenceReason::UserPrefEnabled
            } else {
                PreferenceReason::UserPrefDisabled
            };
            return Ok(PreferenceDecision::new(enabled, reason));
        }

        // Tier 3: role-level default
        if let Some(enabled) = self.load_role_default(role, category, channel).await? {
            let reason = if enabled {
                PreferenceReason::RoleDefaultEnabled
            } else {
                PreferenceReason::RoleDefaultDisabled
            };
            return Ok(PreferenceDecision::new(enabled, reason));
        }

        // Tier 4: system fallback
        let enabled = category.enabled_by_default();
        let reason = if enabled {
            PreferenceReason::SystemFallbackEnabled
        } else {
            PreferenceReason::SystemFallbackDisabled
        };
        Ok(PreferenceDecision::new(enabled, reason))
    }

    /// Resolve a batch, preloading the distinct policies first so policy
    /// lookups are bounded by distinct template keys rather than request
    /// count.
    pub async fn batch_resolve(
        &self,
        requests: &[PreferenceRequest],
    ) -> Result<Vec<PreferenceDecision>, StoreError> {
        let distinct_keys: HashSet<&str> =
            requests.iter().map(|r| r.template_key.as_str()).collect();
        for key in distinct_keys {
            self.load_policy(key).await?;
        }

        let mut decisions = Vec::with_capacity(requests.len());
        for request in requests {
            decisions.push(
                self.is_channel_enabled(
                    &request.user_id,
                    request.role,
                    &request.template_key,
                    request.channel,
                )
                .await?,
            );
        }
        Ok(decisions)
    }

    /// Drop both caches. Must be called after policy/preference/role rows
    /// are mutated out-of-band.
    pub fn clear_cache(&self) {
        self.policy_cache.invalidate_all();
        self.role_cache.invalidate_all();
    }

    async fn load_policy(
        &self,
        template_key: &str,
    ) -> Result<Option<NotificationPolicy>, StoreError> {
        if let Some(cached) = self.policy_cache.get(&template_key.to_string()) {
            PREFERENCE_CACHE_HITS_TOTAL.with_label_values(&["policy"]).inc();
            return Ok(cached);
        }
        PREFERENCE_CACHE_MISSES_TOTAL.with_label_values(&["policy"]).inc();

        // Misses are cached too, so absent policies stay cheap
        let policy = self.repo.find_policy(template_key).await?;
        self.policy_cache.put(template_key.to_string(), policy.clone());
        Ok(policy)
    }

    async fn load_role_default(
        &self,
        role: RecipientRole,
        category: NotificationCategory,
        channel: Channel,
    ) -> Result<Option<bool>, StoreError> {
        let key = RoleDefaultKey {
            role,
            category,
            channel,
        };
        if let Some(cached) = self.role_cache.get(&key) {
            PREFERENCE_CACHE_HITS_TOTAL
                .with_label_values(&["role_default"])
                .inc();
            return Ok(cached);
        }
        PREFERENCE_CACHE_MISSES_TOTAL
            .with_label_values(&["role_default"])
            .inc();

        let default = self.repo.find_role_default(role, category, channel).await?;
        self.role_cache.put(key, default);
        Ok(default)
    }
}
