//! Enqueue-time coordination.
//!
//! `NotificationService` turns a logical "notify user X about event Y"
//! request into a durable, idempotent, preference-gated notification row
//! plus exactly one delivery job. Delivery itself is asynchronous; the
//! only failures callers see here are hard store/queue failures.

use std::sync::Arc;

use futures::stream::{self, StreamExt};

use crate::domain::notification::{
    idempotency_key, EnqueueResult, NotificationLog, NotificationStatus, SendNotificationRequest,
};
use crate::domain::preference::PreferenceResolver;
use crate::domain::template::TemplateResolver;
use crate::error::{Result, ServiceError};
use crate::metrics::{
    NOTIFICATIONS_DEDUPLICATED_TOTAL, NOTIFICATIONS_ENQUEUED_TOTAL, NOTIFICATIONS_SKIPPED_TOTAL,
};
use crate::queue::{DeliveryJob, DeliveryQueue};
use crate::store::{NotificationStore, StoreError};

pub struct NotificationService {
    store: Arc<dyn NotificationStore>,
    queue: Arc<dyn DeliveryQueue>,
    preferences: Arc<PreferenceResolver>,
    templates: Arc<TemplateResolver>,
}

impl NotificationService {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        queue: Arc<dyn DeliveryQueue>,
        preferences: Arc<PreferenceResolver>,
        templates: Arc<TemplateResolver>,
    ) -> Self {
        Self {
            store,
            queue,
            preferences,
            templates,
        }
    }

    /// Enqueue one notification.
    ///
    /// Identical identity fields always resolve to the same row: a second
    /// call is deduplicated regardless of the first row's status. When
    /// preferences disable delivery, a SKIPPED row is the only side
    /// effect; no template is resolved and no job is queued.
    #[tracing::instrument(
        name = "service.send",
        skip(self, request),
        fields(
            event_name = %request.event_name,
            recipient_id = %request.recipient_id,
            channel = %request.channel,
            template_key = %request.template_key
        )
    )]
    pub async fn send(&self, request: &SendNotificationRequest) -> Result<EnqueueResult> {
        let key = idempotency_key(
            &request.event_name,
            &request.recipient_id,
            request.channel,
            &request.template_key,
            &request.variables,
        );

        if let Some(existing) = self.store.find_by_idempotency_key(&key).await? {
            NOTIFICATIONS_DEDUPLICATED_TOTAL.inc();
            tracing::debug!(notification_id = %existing.id, "Duplicate enqueue deduplicated");
            return Ok(EnqueueResult {
                notification_id: existing.id,
                deduplicated: true,
                skipped: false,
            });
        }

        let decision = self
            .preferences
            .is_channel_enabled(
                &request.recipient_id,
                request.recipient_role,
                &request.template_key,
                request.channel,
            )
            .await?;

        if !decision.enabled {
            let mut log =
                NotificationLog::from_request(request, key, NotificationStatus::Skipped);
            log.skip_reason = Some(decision.reason.as_str().to_string());

            let log = match self.store.insert(log).await {
                Ok(log) => log,
                Err(StoreError::DuplicateKey(key)) => return self.resolve_lost_race(&key).await,
                Err(e) => return Err(e.into()),
            };

            NOTIFICATIONS_SKIPPED_TOTAL.inc();
            tracing::info!(
                notification_id = %log.id,
                reason = %decision.reason,
                "Notification skipped by preferences"
            );
            return Ok(EnqueueResult {
                notification_id: log.id,
                deduplicated: false,
                skipped: true,
            });
        }

        let mut log = NotificationLog::from_request(request, key, NotificationStatus::Pending);

        // Best-effort audit snapshot; a resolution failure here is
        // deliberately non-fatal, the worker fails cleanly at send time
        match self
            .templates
            .resolve(&request.template_key, request.channel, &request.variables)
            .await
        {
            Ok(resolved) => {
                log.template_version = resolved.version;
                log.template_snapshot = Some(resolved.snapshot);
                log.policy_version = resolved.policy_version;
            }
            Err(e) => {
                tracing::warn!(
                    template_key = %request.template_key,
                    error = %e,
                    "Template snapshot failed at enqueue time, proceeding"
                );
            }
        }

        let log = match self.store.insert(log).await {
            Ok(log) => log,
            Err(StoreError::DuplicateKey(key)) => return self.resolve_lost_race(&key).await,
            Err(e) => return Err(e.into()),
        };

        self.queue.submit(DeliveryJob::new(log.id)).await?;

        NOTIFICATIONS_ENQUEUED_TOTAL.inc();
        tracing::info!(notification_id = %log.id, "Notification enqueued");
        Ok(EnqueueResult {
            notification_id: log.id,
            deduplicated: false,
            skipped: false,
        })
    }

    /// Enqueue a batch with bounded concurrency. Failures are logged and
    /// excluded from the result, never propagated; successful results keep
    /// the input order.
    pub async fn send_all(&self, requests: &[SendNotificationRequest]) -> Vec<EnqueueResult> {
        const MAX_CONCURRENT_ENQUEUES: usize = 8;

        stream::iter(requests)
            .map(|request| async move {
                match self.send(request).await {
                    Ok(result) => Some(result),
                    Err(e) => {
                        tracing::error!(
                            event_name = %request.event_name,
                            recipient_id = %request.recipient_id,
                            error = %e,
                            "Failed to enqueue notification in batch"
                        );
                        None
                    }
                }
            })
            .buffered(MAX_CONCURRENT_ENQUEUES)
            .filter_map(|result| async move { result })
            .collect()
            .await
    }

    /// Reset a FAILED row to PENDING and submit a fresh delivery job.
    ///
    /// Returns `false` when the row is missing or not FAILED (SENT and
    /// SKIPPED are terminal; PENDING already owns a job).
    pub async fn requeue(&self, id: uuid::Uuid) -> Result<bool> {
        let mut log = match self.store.get(id).await? {
            Some(log) => log,
            None => return Ok(false),
        };

        if log.status != NotificationStatus::Failed {
            return Ok(false);
        }

        log.status = NotificationStatus::Pending;
        log.error_message = None;
        log.next_retry_at = None;
        self.store.update(&log).await?;
        self.queue.submit(DeliveryJob::new(log.id)).await?;

        tracing::info!(notification_id = %log.id, "Notification requeued");
        Ok(true)
    }

    /// Requeue up to `limit` oldest transiently failed rows, identified by
    /// a pending `next_retry_at`. Permanently failed rows (blocked
    /// recipient, missing template, exhausted attempts) stay terminal;
    /// reviving those is the explicit [`requeue_failed`] admin operation.
    ///
    /// [`requeue_failed`]: NotificationService::requeue_failed
    pub async fn recover_transient_failures(&self, limit: usize) -> Result<usize> {
        let failed = self.store.find_failed(limit).await?;
        let mut requeued = 0;
        for row in failed {
            if row.next_retry_at.is_none() {
                continue;
            }
            if self.requeue(row.id).await? {
                requeued += 1;
            }
        }
        tracing::info!(requeued = requeued, "Recovered transiently failed notifications");
        Ok(requeued)
    }

    /// Requeue up to `limit` oldest FAILED rows, including permanently
    /// failed ones; returns how many were requeued.
    pub async fn requeue_failed(&self, limit: usize) -> Result<usize> {
        let failed = self.store.find_failed(limit).await?;
        let mut requeued = 0;
        for row in failed {
            if self.requeue(row.id).await? {
                requeued += 1;
            }
        }
        tracing::info!(requeued = requeued, "Bulk requeue of failed notifications");
        Ok(requeued)
    }

    /// A concurrent enqueue with the same identity won the insert race;
    /// resolve to its row.
    async fn resolve_lost_race(&self, key: &str) -> Result<EnqueueResult> {
        let existing = self
            .store
            .find_by_idempotency_key(key)
            .await?
            .ok_or_else(|| {
                ServiceError::Store(StoreError::Invalid(format!(
                    "row for duplicate key {} disappeared",
                    key
                )))
            })?;
        NOTIFICATIONS_DEDUPLICATED_TOTAL.inc();
        Ok(EnqueueResult {
            notification_id: existing.id,
            deduplicated: true,
            skipped: false,
        })
    }
}
