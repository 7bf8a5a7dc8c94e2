//! Background publisher for the transactional outbox.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use paywell_core::resilience::{Resilience, ResilienceError};

use crate::domain::repository::{EventPublisher, OutboxRepository};
use crate::error::PaymentServiceError;

#[derive(Debug, Clone)]
pub struct OutboxWorkerConfig {
    pub poll_interval: Duration,
    pub batch_size: u64,
    /// Failed rows are re-queued while their retry count is below this.
    pub max_retries: i32,
    pub requeue_interval: Duration,
}

impl Default for OutboxWorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 10,
            max_retries: 5,
            requeue_interval: Duration::from_secs(60),
        }
    }
}

/// Counts for one `process_batch` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub claimed: usize,
    pub published: usize,
    pub failed: usize,
    /// Left pending because the publisher breaker was open or the worker
    /// was cancelled mid-batch.
    pub deferred: usize,
}

pub struct OutboxWorker<R: OutboxRepository, P: EventPublisher> {
    pub outbox: R,
    pub publisher: P,
    /// Guards publisher calls.
    pub resilience: Resilience,
    pub config: OutboxWorkerConfig,
}

impl<R: OutboxRepository, P: EventPublisher> OutboxWorker<R, P> {
    /// Poll until `cancel` fires, then drain one last batch.
    ///
    /// The first batch runs immediately. Failed rows are swept back to
    /// pending on `requeue_interval`.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            "outbox worker started"
        );
        let mut poll = tokio::time::interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut requeue = tokio::time::interval(self.config.requeue_interval);
        requeue.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = poll.tick() => {
                    if let Err(e) = self.process_batch(&cancel).await {
                        error!(error = %e, "outbox batch failed");
                    }
                }
                _ = requeue.tick() => {
                    if let Err(e) = self.requeue_failed().await {
                        error!(error = %e, "outbox requeue failed");
                    }
                }
            }
        }

        info!("outbox worker draining before shutdown");
        if let Err(e) = self.process_batch(&CancellationToken::new()).await {
            error!(error = %e, "final outbox drain failed");
        }
        info!("outbox worker stopped");
    }

    /// Claim and publish one batch in order. A failed publish marks that row
    /// failed and moves on; an open breaker leaves the remaining rows
    /// pending. Nothing is claimed while the breaker is rejecting calls.
    pub async fn process_batch(
        &self,
        cancel: &CancellationToken,
    ) -> Result<BatchReport, PaymentServiceError> {
        if self.resilience.breaker().is_rejecting() {
            debug!("publisher breaker open; not claiming outbox rows");
            return Ok(BatchReport::default());
        }
        let records = self.outbox.claim_pending(self.config.batch_size).await?;
        let mut report = BatchReport {
            claimed: records.len(),
            ..BatchReport::default()
        };

        for (index, record) in records.iter().enumerate() {
            let event = record.to_publish_event();
            let event = &event;
            let publisher = &self.publisher;
            match self
                .resilience
                .execute(cancel, move || publisher.publish(event))
                .await
            {
                Ok(()) => {
                    if let Err(e) = self.outbox.mark_published(record.id).await {
                        error!(outbox_id = %record.id, error = %e, "failed to mark event published");
                    }
                    report.published += 1;
                }
                Err(e @ (ResilienceError::CircuitOpen { .. } | ResilienceError::Cancelled)) => {
                    report.deferred = records.len() - index;
                    warn!(
                        outbox_id = %record.id,
                        deferred = report.deferred,
                        error = %e,
                        "publisher unavailable; leaving rest of batch pending"
                    );
                    break;
                }
                Err(e) => {
                    let message = format!("{e:#}");
                    warn!(
                        outbox_id = %record.id,
                        event_type = %record.event_type,
                        retry_count = record.retry_count,
                        error = %message,
                        "failed to publish event"
                    );
                    if let Err(e) = self.outbox.mark_failed(record.id, &message).await {
                        error!(outbox_id = %record.id, error = %e, "failed to mark event failed");
                    }
                    report.failed += 1;
                }
            }
        }

        if report.claimed > 0 {
            info!(
                claimed = report.claimed,
                published = report.published,
                failed = report.failed,
                deferred = report.deferred,
                "outbox batch processed"
            );
        }
        Ok(report)
    }

    pub async fn requeue_failed(&self) -> Result<u64, PaymentServiceError> {
        let requeued = self.outbox.requeue_failed(self.config.max_retries).await?;
        if requeued > 0 {
            info!(requeued, "failed outbox events re-queued");
        }
        Ok(requeued)
    }
}

/// A spawned background task that can be stopped.
pub struct WorkerHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Spawn the future built by `task`, handing it the stop signal.
    pub fn spawn<F, Fut>(task: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let join = tokio::spawn(task(cancel.clone()));
        Self { cancel, join }
    }

    /// Signal the task and wait for it to finish.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.join.await {
            error!(error = %e, "background task panicked");
        }
    }
}
