//! Polling consumer for the distributed backend.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;
use tokio::time;

use pixelforge_core::types::operation::OperationType;

use super::redis::{ClaimedJob, RedisQueue};
use crate::error::JobExecutionError;
use crate::processor::{JobContext, JobProcessor, execute_attempt};

/// Running consumer bound to one distributed queue.
#[derive(Debug)]
pub struct ConsumerHandle {
    operation: OperationType,
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ConsumerHandle {
    /// Operation this consumer serves.
    pub fn operation(&self) -> OperationType {
        self.operation
    }

    /// Stop polling. Gives up after `timeout`; in-flight jobs are abandoned.
    pub async fn close(self, timeout: Duration) {
        let _ = self.cancel.send(true);
        let abort = self.task.abort_handle();

        match time::timeout(timeout, self.task).await {
            Ok(Ok(())) => {
                tracing::debug!("Consumer for '{}' stopped", self.operation);
            }
            Ok(Err(e)) => {
                tracing::warn!("Consumer for '{}' ended abnormally: {}", self.operation, e);
            }
            Err(_) => {
                abort.abort();
                tracing::warn!(
                    "Consumer for '{}' did not stop within {}ms, aborted",
                    self.operation,
                    timeout.as_millis()
                );
            }
        }
    }
}

/// Start polling `queue`, running at most `concurrency` jobs at once.
pub fn spawn_consumer(
    queue: RedisQueue,
    processor: Arc<dyn JobProcessor>,
    concurrency: usize,
    poll_interval: Duration,
) -> ConsumerHandle {
    let operation = queue.operation();
    let (cancel, cancel_rx) = watch::channel(false);
    let task = tokio::spawn(run(queue, processor, concurrency.max(1), poll_interval, cancel_rx));

    ConsumerHandle {
        operation,
        cancel,
        task,
    }
}

async fn run(
    queue: RedisQueue,
    processor: Arc<dyn JobProcessor>,
    concurrency: usize,
    poll_interval: Duration,
    mut cancel: watch::Receiver<bool>,
) {
    let operation = queue.operation();
    tracing::info!(
        "Consumer for '{}' started with concurrency={}, poll_interval={}ms",
        operation,
        concurrency,
        poll_interval.as_millis()
    );

    let semaphore = Arc::new(Semaphore::new(concurrency));

    loop {
        let permit = tokio::select! {
            _ = cancel.changed() => break,
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        match queue.claim_next().await {
            Ok(Some(job)) => {
                let queue = queue.clone();
                let processor = processor.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    run_job(&queue, &processor, job).await;
                });
                continue;
            }
            Ok(None) => {
                drop(permit);
                tracing::trace!("No jobs waiting in '{}'", operation);
            }
            Err(e) => {
                drop(permit);
                tracing::warn!("Failed to claim job from '{}': {}", operation, e);
            }
        }

        tokio::select! {
            _ = cancel.changed() => break,
            _ = time::sleep(poll_interval) => {}
        }
    }

    tracing::info!("Consumer for '{}' shut down", operation);
}

async fn run_job(queue: &RedisQueue, processor: &Arc<dyn JobProcessor>, job: ClaimedJob) {
    let job_id = job.id.clone();
    let options = job.options;
    let attempt = job.attempts_made + 1;

    tracing::info!(
        "Processing job: id={}, operation='{}', attempt={}/{}",
        job_id,
        queue.operation(),
        attempt,
        options.attempts
    );

    let ctx = JobContext::new(
        job.id,
        queue.operation(),
        job.payload,
        options,
        job.attempts_made,
        Arc::new(queue.clone()),
    );

    match execute_attempt(processor, &ctx).await {
        Ok(result) => {
            if let Err(e) = queue.complete(&job_id, &result, attempt).await {
                tracing::error!("Failed to mark job {} as completed: {}", job_id, e);
                return;
            }
            tracing::info!("Job {} completed successfully", job_id);
        }
        Err(err) => {
            let message = err.to_string();
            match &err {
                JobExecutionError::Transient(_) => {
                    tracing::warn!("Job {} failed (transient): {}", job_id, message);
                }
                JobExecutionError::Permanent(_) => {
                    tracing::error!("Job {} failed permanently: {}", job_id, message);
                }
                JobExecutionError::Internal(_) => {
                    tracing::error!("Job {} internal error: {}", job_id, message);
                }
            }

            if err.is_retryable() && attempt < options.attempts {
                let delay = Duration::from_millis(options.backoff_for(attempt));
                if let Err(e) = queue.retry(&job_id, &message, attempt, delay).await {
                    tracing::error!("Failed to retry job {}: {}", job_id, e);
                }
            } else if let Err(e) = queue.fail(&job_id, &message, attempt).await {
                tracing::error!("Failed to mark job {} as failed: {}", job_id, e);
            }
        }
    }
}
