//! Queue consumer: bounded worker pool, per-job attempt loop, status reports
//! and acknowledgment.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::models::job::{JobStatus, ProcessingJob};
use crate::models::result::ProcessingResult;
use crate::services::catalog::StatusReporter;
use crate::services::processor::JobProcessor;
use crate::services::queue::{Delivery, MessageQueue, QueueError};

/// Messages read from the broker in one request at most.
const MAX_BATCH: usize = 8;
/// Pause after a failed broker read.
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Attempts per job and the wait between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// Wait after failed attempt `attempt` (1-based): `attempt²` seconds.
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_secs(u64::from(attempt).pow(2))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    /// Name of this worker inside the consumer group.
    pub consumer_name: String,
    pub max_concurrent_jobs: usize,
    pub retry: RetryPolicy,
    /// Unacknowledged messages idle this long are taken over.
    pub claim_idle: Duration,
    pub claim_interval: Duration,
    /// Longest a single broker read blocks.
    pub receive_block: Duration,
    pub shutdown_grace: Duration,
}

impl ConsumerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_concurrent_jobs: config.max_concurrent_jobs,
            retry: RetryPolicy {
                max_attempts: config.max_attempts,
            },
            claim_idle: config.claim_idle(),
            // In-flight messages are touched once per claim tick.
            claim_interval: Duration::from_secs(30)
                .min(config.claim_idle() / 2)
                .max(Duration::from_secs(1)),
            shutdown_grace: config.shutdown_grace(),
            ..Self::default()
        }
    }
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            consumer_name: format!("worker-{}", Uuid::new_v4()),
            max_concurrent_jobs: 4,
            retry: RetryPolicy::default(),
            claim_idle: Duration::from_secs(600),
            claim_interval: Duration::from_secs(30),
            receive_block: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(60),
        }
    }
}

/// How the consumer finished with one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Payload was not a valid job; rejected without requeue.
    Rejected,
    Completed { attempts: u32 },
    Failed { attempts: u32 },
}

pub struct Consumer {
    queue: Arc<dyn MessageQueue>,
    processor: Arc<dyn JobProcessor>,
    reporter: Arc<dyn StatusReporter>,
    settings: ConsumerSettings,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    /// Message ids being handled by this consumer.
    active: Mutex<HashSet<String>>,
}

impl Consumer {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        processor: Arc<dyn JobProcessor>,
        reporter: Arc<dyn StatusReporter>,
        settings: ConsumerSettings,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_concurrent_jobs.max(1)));
        Self {
            queue,
            processor,
            reporter,
            settings,
            permits,
            tracker: TaskTracker::new(),
            active: Mutex::new(HashSet::new()),
        }
    }

    /// Jobs currently being handled.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Receive and dispatch until `shutdown` fires, then wait for in-flight
    /// jobs for at most the configured grace period.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        tracing::info!(
            consumer = %self.settings.consumer_name,
            max_concurrent_jobs = self.settings.max_concurrent_jobs,
            max_attempts = self.settings.retry.max_attempts,
            "Starting job consumer"
        );

        let claimer = tokio::spawn(Arc::clone(&self).claim_loop(shutdown.clone()));

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Shutdown signal received, stopping intake");
                    break;
                }
                result = self.receive_batch() => {
                    if let Err(e) = result {
                        tracing::error!(error = %e, "Failed to receive jobs");
                        tokio::select! {
                            _ = shutdown.cancelled() => {}
                            _ = tokio::time::sleep(RECEIVE_ERROR_BACKOFF) => {}
                        }
                    }
                }
            }
        }

        if let Err(e) = claimer.await {
            tracing::warn!(error = %e, "Claim task ended abnormally");
        }

        self.tracker.close();
        tracing::info!(in_flight = self.in_flight(), "Waiting for in-flight jobs to complete");
        if tokio::time::timeout(self.settings.shutdown_grace, self.tracker.wait())
            .await
            .is_err()
        {
            tracing::warn!(
                in_flight = self.in_flight(),
                "Shutdown grace period elapsed with jobs still running"
            );
        }

        tracing::info!("Job consumer stopped");
    }

    /// Wait for a free worker, then read at most as many messages as there
    /// are free workers. Unread messages stay on the broker.
    async fn receive_batch(self: &Arc<Self>) -> Result<(), QueueError> {
        let Ok(first) = Arc::clone(&self.permits).acquire_owned().await else {
            return Ok(());
        };
        let mut permits = vec![first];
        permits.extend(self.free_permits(MAX_BATCH - 1));

        let deliveries = self
            .queue
            .receive(&self.settings.consumer_name, permits.len(), self.settings.receive_block)
            .await?;

        if !deliveries.is_empty() {
            tracing::debug!(count = deliveries.len(), "Received jobs");
        }
        for (delivery, permit) in deliveries.into_iter().zip(permits) {
            self.dispatch(delivery, permit);
        }
        Ok(())
    }

    /// Periodically take over messages other workers received but never
    /// acknowledged. Messages still running here are touched first so their
    /// idle time never reaches the claim threshold.
    async fn claim_loop(self: Arc<Self>, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.settings.claim_interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let active = self.active_ids();
                    if let Err(e) = self.queue.touch(&self.settings.consumer_name, &active).await {
                        tracing::warn!(error = %e, count = active.len(), "Failed to refresh in-flight jobs");
                    }

                    let permits = self.free_permits(MAX_BATCH);
                    if permits.is_empty() {
                        continue;
                    }
                    match self
                        .queue
                        .claim_stale(&self.settings.consumer_name, self.settings.claim_idle, permits.len())
                        .await
                    {
                        Ok(claimed) => {
                            if !claimed.is_empty() {
                                tracing::info!(count = claimed.len(), "Claimed stale jobs");
                            }
                            for (delivery, permit) in claimed.into_iter().zip(permits) {
                                self.dispatch(delivery, permit);
                            }
                        }
                        Err(e) => tracing::warn!(error = %e, "Failed to claim stale jobs"),
                    }
                }
            }
        }
    }

    fn free_permits(&self, max: usize) -> Vec<OwnedSemaphorePermit> {
        std::iter::from_fn(|| Arc::clone(&self.permits).try_acquire_owned().ok())
            .take(max)
            .collect()
    }

    fn active_ids(&self) -> Vec<String> {
        self.lock_active().iter().cloned().collect()
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start handling `delivery` unless this consumer already is. A message
    /// can come back through a claim while its first delivery still runs.
    fn dispatch(self: &Arc<Self>, delivery: Delivery, permit: OwnedSemaphorePermit) {
        if !self.lock_active().insert(delivery.message_id.clone()) {
            tracing::debug!(message_id = %delivery.message_id, "Message already in flight, skipping");
            return;
        }

        let consumer = Arc::clone(self);
        metrics::gauge!("video_jobs_in_flight").increment(1.0);
        self.tracker.spawn(async move {
            let _permit = permit;
            let message_id = delivery.message_id.clone();
            consumer.handle_delivery(delivery).await;
            consumer.lock_active().remove(&message_id);
            metrics::gauge!("video_jobs_in_flight").decrement(1.0);
        });
    }

    /// Handle one message end to end. The message is acknowledged after the
    /// job reaches a terminal state, whatever that state is.
    pub async fn handle_delivery(&self, delivery: Delivery) -> JobOutcome {
        metrics::counter!("video_jobs_received_total").increment(1);

        let job = match ProcessingJob::from_payload(&delivery.payload) {
            Ok(job) => job,
            Err(e) => {
                metrics::counter!("video_jobs_malformed_total").increment(1);
                tracing::warn!(message_id = %delivery.message_id, error = %e, "Rejecting malformed job");
                if let Err(e) = self.queue.nack(&delivery, false).await {
                    tracing::error!(message_id = %delivery.message_id, error = %e, "Failed to reject message");
                }
                return JobOutcome::Rejected;
            }
        };

        let span = tracing::info_span!(
            "processing_job",
            job_id = %job.id,
            video_id = job.video_id,
            user_id = job.user_id,
            message_id = %delivery.message_id,
        );

        async {
            let outcome = self.drive_job(&job).await;
            if let Err(e) = self.queue.ack(&delivery.message_id).await {
                tracing::error!(error = %e, "Failed to acknowledge message, broker will redeliver");
            }
            outcome
        }
        .instrument(span)
        .await
    }

    async fn drive_job(&self, job: &ProcessingJob) -> JobOutcome {
        let started = Instant::now();
        let max_attempts = self.settings.retry.max_attempts.max(1);

        self.report(job, JobStatus::Processing).await;

        let mut attempt = 0;
        let result: ProcessingResult = loop {
            attempt += 1;
            metrics::counter!("video_job_attempts_total").increment(1);
            tracing::info!(attempt, max_attempts, "Starting attempt");

            let result = self.processor.process(job).await;
            if result.is_completed() || attempt >= max_attempts {
                break result;
            }

            let delay = self.settings.retry.backoff(attempt);
            tracing::warn!(
                attempt,
                error = %result.message,
                retry_in_secs = delay.as_secs(),
                "Attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
        };

        metrics::histogram!("video_job_processing_seconds").record(started.elapsed().as_secs_f64());

        if result.is_completed() {
            metrics::counter!("video_jobs_completed_total").increment(1);
            tracing::info!(
                attempts = attempt,
                frame_count = result.frame_count,
                archive = result.zip_path.as_deref().unwrap_or_default(),
                "Job completed"
            );
            self.report(job, JobStatus::Completed).await;
            JobOutcome::Completed { attempts: attempt }
        } else {
            metrics::counter!("video_jobs_failed_total").increment(1);
            tracing::error!(attempts = attempt, error = %result.message, "Job failed after all attempts");
            self.report(job, JobStatus::Failed).await;
            JobOutcome::Failed { attempts: attempt }
        }
    }

    /// Status updates are best effort; failures never affect the job.
    async fn report(&self, job: &ProcessingJob, status: JobStatus) {
        if let Err(e) = self.reporter.report(job, status).await {
            metrics::counter!("video_status_update_failures_total").increment(1);
            tracing::warn!(status = %status, error = %e, "Failed to update video status");
        }
    }
}
