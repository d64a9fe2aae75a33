//! Job executor.
//!
//! Consumes one job at a time from the queue, runs the processor, and
//! translates the outcome into queue-level ack, redelivery or DLQ.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use renderq_comfy::ComfyApi;
use renderq_queue::{JobSource, QueueJob};

use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::notifier::CompletionNotifier;
use crate::processor::process_job;

/// Job executor that processes queue messages sequentially.
///
/// Single-job-at-a-time per instance: the queue broker distributes work
/// across instances; within one instance every job runs to completion or
/// failure before the next message is read.
pub struct JobExecutor {
    config: WorkerConfig,
    queue: Arc<dyn JobSource>,
    client: Arc<dyn ComfyApi>,
    notifier: Arc<dyn CompletionNotifier>,
    shutdown: watch::Sender<bool>,
    consumer_name: String,
}

impl JobExecutor {
    /// Create a new job executor.
    pub fn new(
        config: WorkerConfig,
        queue: Arc<dyn JobSource>,
        client: Arc<dyn ComfyApi>,
        notifier: Arc<dyn CompletionNotifier>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let consumer_name = format!("worker-{}", Uuid::new_v4());

        Self {
            config,
            queue,
            client,
            notifier,
            shutdown,
            consumer_name,
        }
    }

    /// Run the consume loop until shutdown is signalled.
    ///
    /// Only the blocking queue read sits in a cancellable `select!`
    /// position. Once a message is in hand the job runs to completion in
    /// the arm body, and claim scans run between jobs, so neither shutdown
    /// nor the claim schedule can abort a job mid-flight.
    pub async fn run(&self) -> WorkerResult<()> {
        info!("Starting job executor '{}'", self.consumer_name);

        self.queue.init().await?;

        let mut shutdown_rx = self.shutdown.subscribe();
        let mut next_claim = tokio::time::Instant::now();

        loop {
            if *shutdown_rx.borrow() {
                info!("Shutdown signal received, stopping executor");
                break;
            }

            if tokio::time::Instant::now() >= next_claim {
                next_claim = tokio::time::Instant::now() + self.config.claim_interval;
                if let Err(e) = self.claim_once().await {
                    warn!("Failed to claim pending jobs: {}", e);
                }
            }

            tokio::select! {
                _ = shutdown_rx.changed() => {}
                result = self.queue.consume(&self.consumer_name, 1000, 1) => {
                    match result {
                        Ok(jobs) => {
                            for (message_id, job) in jobs {
                                self.execute_job(message_id, job).await;
                            }
                        }
                        Err(e) => {
                            error!("Error consuming jobs: {}", e);
                            // Back off so a dead broker does not spin the loop
                            tokio::time::sleep(Duration::from_secs(5)).await;
                        }
                    }
                }
            }
        }

        info!("Job executor stopped");
        Ok(())
    }

    /// Recover messages left pending by a crashed consumer.
    async fn claim_once(&self) -> WorkerResult<()> {
        let idle_ms = self.config.claim_min_idle.as_millis() as u64;
        let jobs = self
            .queue
            .claim_pending(&self.consumer_name, idle_ms, 1)
            .await?;
        for (message_id, job) in jobs {
            self.execute_job(message_id, job).await;
        }
        Ok(())
    }

    /// Execute a single job and settle its queue message.
    async fn execute_job(&self, message_id: String, job: QueueJob) {
        if job.kind() != self.config.job_kind {
            debug!(
                "Skipping job {} of kind '{}' (worker handles '{}')",
                job.job_id(),
                job.kind(),
                self.config.job_kind
            );
            self.queue.ack(&message_id).await.ok();
            return;
        }

        let job_id = job.job_id().clone();
        info!("Executing job {}", job_id);

        let result = match &job {
            QueueJob::RenderVideo(render) => {
                process_job(
                    self.client.as_ref(),
                    self.notifier.as_ref(),
                    render,
                    &self.config,
                )
                .await
            }
        };

        match result {
            Ok(key) => {
                info!("Job {} completed, delivered as {}", job_id, key);
                if let Err(e) = self.queue.ack(&message_id).await {
                    error!("Failed to ack job {}: {}", job_id, e);
                }
                if let Err(e) = self.queue.clear_dedup(&job).await {
                    warn!("Failed to clear dedup key for job {}: {}", job_id, e);
                }
            }
            Err(e) => {
                error!("Job {} failed: {}", job_id, e);

                let retry_count = self.queue.increment_retry(&message_id).await.unwrap_or(u32::MAX);
                let max_retries = self.queue.max_retries();

                if retry_count >= max_retries {
                    warn!(
                        "Job {} exceeded max retries ({}), moving to DLQ",
                        job_id, max_retries
                    );
                    if let Err(dlq_err) = self.queue.dlq(&message_id, &job, &e.to_string()).await {
                        error!("Failed to move job {} to DLQ: {}", job_id, dlq_err);
                    }
                    if let Err(e) = self.queue.clear_dedup(&job).await {
                        warn!("Failed to clear dedup key for job {}: {}", job_id, e);
                    }
                } else {
                    info!(
                        "Job {} left pending for redelivery (attempt {}/{})",
                        job_id, retry_count, max_retries
                    );
                }
            }
        }
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}
