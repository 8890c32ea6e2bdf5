//! Dequeue-time delivery execution.
//!
//! `DeliveryWorker::execute` is the per-job state machine: it loads the
//! row, accounts the attempt, renders the template, invokes the channel
//! provider and writes the terminal or schedulable state back. Every
//! non-retryable outcome is fully resolved here; only the transient case
//! asks the caller to reschedule.

pub mod backoff;
mod pool;

pub use backoff::{BACKOFF_DELAYS_SECS, JITTER_FACTOR, MAX_DELIVERY_ATTEMPTS};
pub use pool::WorkerPool;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::channel::ProviderRegistry;
use crate::domain::notification::{NotificationLog, NotificationStatus};
use crate::domain::template::{TemplateError, TemplateResolver};
use crate::metrics::{DeliveryMetrics, DELIVERY_ATTEMPT_DURATION};
use crate::store::{NotificationStore, StoreError};

/// Result of executing one delivery job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Send succeeded; the row is SENT
    Sent,
    /// The row no longer exists; nothing to do
    NotFound,
    /// The row is already SENT; duplicate or late-arriving job
    AlreadySent,
    /// The row is FAILED with no retry scheduled
    FailedPermanently,
    /// The row is FAILED transiently; the caller should resubmit the job
    /// after `retry_after`
    FailedTransient { retry_after: Duration },
}

/// Executes delivery jobs against the store and channel providers.
pub struct DeliveryWorker {
    store: Arc<dyn NotificationStore>,
    templates: Arc<TemplateResolver>,
    providers: Arc<ProviderRegistry>,
}

impl DeliveryWorker {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        templates: Arc<TemplateResolver>,
        providers: Arc<ProviderRegistry>,
    ) -> Self {
        Self {
            store,
            templates,
            providers,
        }
    }

    /// Execute one delivery attempt for a notification id.
    ///
    /// Errors surface only for store failures; all delivery-classification
    /// failures are written to the row and reported through the outcome.
    #[tracing::instrument(name = "worker.execute", skip(self))]
    pub async fn execute(&self, notification_id: Uuid) -> Result<DeliveryOutcome, StoreError> {
        let timer = DELIVERY_ATTEMPT_DURATION.start_timer();
        let outcome = self.execute_inner(notification_id).await;
        timer.observe_duration();
        outcome
    }

    async fn execute_inner(&self, notification_id: Uuid) -> Result<DeliveryOutcome, StoreError> {
        let mut log = match self.store.get(notification_id).await? {
            Some(log) => log,
            None => {
                tracing::debug!(notification_id = %notification_id, "No row for delivery job");
                return Ok(DeliveryOutcome::NotFound);
            }
        };

        // Idempotent short-circuit: a duplicate or late retry of an
        // already-successful delivery must not send again
        if log.status == NotificationStatus::Sent {
            tracing::debug!(notification_id = %notification_id, "Row already sent, skipping");
            return Ok(DeliveryOutcome::AlreadySent);
        }

        if log.attempt_count >= MAX_DELIVERY_ATTEMPTS {
            self.fail_permanently(&mut log, "max delivery attempts exceeded".to_string())
                .await?;
            return Ok(DeliveryOutcome::FailedPermanently);
        }

        // Persist the attempt before rendering or sending so accounting
        // survives a crash mid-send
        log.attempt_count += 1;
        log.last_attempt_at = Some(Utc::now());
        self.store.update(&log).await?;

        let resolved = match self
            .templates
            .resolve(&log.template_key, log.channel, &log.payload)
            .await
        {
            Ok(resolved) => resolved,
            // A template-store outage is a hard dependency failure like a
            // failed row load; redelivery recovers it
            Err(TemplateError::Store(e)) => return Err(e),
            Err(e) => {
                // A missing template will not appear on retry
                self.fail_permanently(&mut log, format!("template render failed: {}", e))
                    .await?;
                return Ok(DeliveryOutcome::FailedPermanently);
            }
        };

        let provider = match self.providers.get(log.channel) {
            Some(provider) => provider,
            None => {
                let message = format!("no provider for channel {}", log.channel);
                self.fail_permanently(&mut log, message).await?;
                return Ok(DeliveryOutcome::FailedPermanently);
            }
        };

        let outcome = provider
            .send(
                log.recipient_chat_id,
                &resolved.rendered.text,
                &resolved.rendered.buttons,
            )
            .await;

        if outcome.success {
            log.status = NotificationStatus::Sent;
            log.sent_at = Some(Utc::now());
            log.provider_message_id = outcome.provider_message_id;
            log.error_message = None;
            log.next_retry_at = None;
            self.store.update(&log).await?;

            DeliveryMetrics::record_sent();
            tracing::info!(
                notification_id = %log.id,
                attempt = log.attempt_count,
                provider_message_id = ?log.provider_message_id,
                "Notification delivered"
            );
            return Ok(DeliveryOutcome::Sent);
        }

        let error_message = outcome
            .error_message
            .unwrap_or_else(|| "unknown send failure".to_string());

        if outcome.permanent {
            self.fail_permanently(&mut log, format!("Permanent: {}", error_message))
                .await?;
            return Ok(DeliveryOutcome::FailedPermanently);
        }

        let retry_after = backoff::retry_delay(log.attempt_count);
        log.status = NotificationStatus::Failed;
        log.error_message = Some(error_message);
        log.next_retry_at =
            Some(Utc::now() + chrono::Duration::from_std(retry_after).unwrap_or_default());
        self.store.update(&log).await?;

        DeliveryMetrics::record_transient_failure();
        tracing::warn!(
            notification_id = %log.id,
            attempt = log.attempt_count,
            retry_after_secs = retry_after.as_secs(),
            error = ?log.error_message,
            "Transient delivery failure, retry scheduled"
        );
        Ok(DeliveryOutcome::FailedTransient { retry_after })
    }

    async fn fail_permanently(
        &self,
        log: &mut NotificationLog,
        error_message: String,
    ) -> Result<(), StoreError> {
        log.status = NotificationStatus::Failed;
        log.error_message = Some(error_message);
        log.next_retry_at = None;
        self.store.update(log).await?;

        DeliveryMetrics::record_permanent_failure();
        tracing::warn!(
            notification_id = %log.id,
            attempt = log.attempt_count,
            error = ?log.error_message,
            "Permanent delivery failure"
        );
        Ok(())
    }
}
