//! In-process delivery queue over a bounded tokio channel.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{DeliveryJob, DeliveryQueue, QueueError};

/// Bounded in-memory job queue with per-notification-id coalescing.
///
/// A notification id that is already enqueued (or scheduled for a delayed
/// retry) is not enqueued a second time; the pending set empties as jobs
/// are received.
pub struct MemoryQueue {
    tx: mpsc::Sender<DeliveryJob>,
    rx: tokio::sync::Mutex<mpsc::Receiver<DeliveryJob>>,
    pending: Mutex<HashSet<Uuid>>,
}

impl MemoryQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
            pending: Mutex::new(HashSet::new()),
        }
    }

    /// Number of jobs currently pending (queued or scheduled).
    pub fn pending_len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    fn mark_pending(&self, id: Uuid) -> bool {
        self.pending.lock().unwrap().insert(id)
    }

    fn clear_pending(&self, id: Uuid) {
        self.pending.lock().unwrap().remove(&id);
    }
}

#[async_trait]
impl DeliveryQueue for MemoryQueue {
    async fn submit(&self, job: DeliveryJob) -> Result<(), QueueError> {
        if !self.mark_pending(job.notification_id) {
            tracing::debug!(
                notification_id = %job.notification_id,
                "Job already pending, coalescing submission"
            );
            return Ok(());
        }

        if self.tx.send(job).await.is_err() {
            self.clear_pending(job.notification_id);
            return Err(QueueError::Closed);
        }
        Ok(())
    }

    async fn submit_delayed(&self, job: DeliveryJob, delay: Duration) -> Result<(), QueueError> {
        if !self.mark_pending(job.notification_id) {
            tracing::debug!(
                notification_id = %job.notification_id,
                "Job already pending, coalescing delayed submission"
            );
            return Ok(());
        }

        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(job).await.is_err() {
                tracing::warn!(
                    notification_id = %job.notification_id,
                    "Delivery queue closed before scheduled retry could be submitted"
                );
            }
        });
        Ok(())
    }

    async fn recv(&self) -> Option<DeliveryJob> {
        let job = self.rx.lock().await.recv().await;
        if let Some(job) = job {
            self.clear_pending(job.notification_id);
        }
        job
    }
}
