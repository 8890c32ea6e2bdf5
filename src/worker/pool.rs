//! Bounded pool of delivery executors.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::queue::{DeliveryQueue, QueueError};

use super::{DeliveryOutcome, DeliveryWorker};

/// Default number of concurrent executors.
pub const DEFAULT_WORKER_CONCURRENCY: usize = 5;

/// Runs N concurrent executors over the delivery queue.
///
/// Each job is a single sequential unit of work; jobs for different
/// notification ids run concurrently with the store as the only shared
/// state. This pool is the one place that translates a transient outcome
/// into a delayed resubmission.
pub struct WorkerPool {
    queue: Arc<dyn DeliveryQueue>,
    worker: Arc<DeliveryWorker>,
    concurrency: usize,
}

impl WorkerPool {
    pub fn new(queue: Arc<dyn DeliveryQueue>, worker: Arc<DeliveryWorker>) -> Self {
        Self::with_concurrency(queue, worker, DEFAULT_WORKER_CONCURRENCY)
    }

    pub fn with_concurrency(
        queue: Arc<dyn DeliveryQueue>,
        worker: Arc<DeliveryWorker>,
        concurrency: usize,
    ) -> Self {
        Self {
            queue,
            worker,
            concurrency: concurrency.max(1),
        }
    }

    /// Spawn the executors and run until the shutdown signal fires or the
    /// queue closes. In-flight jobs finish before executors exit.
    pub async fn run(&self, shutdown: broadcast::Sender<()>) {
        let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(self.concurrency);

        for executor_id in 0..self.concurrency {
            let queue = self.queue.clone();
            let worker = self.worker.clone();
            let mut shutdown_rx = shutdown.subscribe();

            handles.push(tokio::spawn(async move {
                tracing::debug!(executor_id = executor_id, "Delivery executor started");
                loop {
                    let job = tokio::select! {
                        job = queue.recv() => match job {
                            Some(job) => job,
                            None => break,
                        },
                        _ = shutdown_rx.recv() => break,
                    };

                    match worker.execute(job.notification_id).await {
                        Ok(DeliveryOutcome::FailedTransient { retry_after }) => {
                            match queue.submit_delayed(job, retry_after).await {
                                Ok(()) => {}
                                Err(QueueError::Closed) => {
                                    tracing::warn!(
                                        notification_id = %job.notification_id,
                                        "Queue closed, dropping scheduled retry"
                                    );
                                }
                            }
                        }
                        Ok(_) => {}
                        Err(e) => {
                            // Store failure: the queue's at-least-once
                            // redelivery is the recovery path
                            tracing::error!(
                                notification_id = %job.notification_id,
                                error = %e,
                                "Delivery job failed on store access"
                            );
                        }
                    }
                }
                tracing::debug!(executor_id = executor_id, "Delivery executor stopped");
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }
    }
}
