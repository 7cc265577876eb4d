//! Job processor trait and the per-attempt context handed to it.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use tracing::{error, warn};

use pixelforge_core::result::AppResult;
use pixelforge_core::types::job::{JobOptions, JobPayload};
use pixelforge_core::types::operation::OperationType;

use crate::error::JobExecutionError;

/// Executes jobs of one operation type. Both backends drive the same trait.
#[async_trait]
pub trait JobProcessor: Send + Sync + std::fmt::Debug + 'static {
    /// Run one attempt of the job and return its structured result.
    async fn process(&self, job: &JobContext) -> Result<Value, JobExecutionError>;
}

/// Where progress updates go; implemented by each backend.
#[async_trait]
pub trait ProgressSink: Send + Sync + std::fmt::Debug + 'static {
    /// Record the job's progress percentage.
    async fn report(&self, job_id: &str, progress: u8) -> AppResult<()>;
}

/// One attempt of one job, as seen by a processor.
#[derive(Debug, Clone)]
pub struct JobContext {
    id: String,
    operation: OperationType,
    payload: JobPayload,
    options: JobOptions,
    attempts_made: u32,
    progress: Arc<dyn ProgressSink>,
}

impl JobContext {
    /// Create a context for an attempt.
    pub fn new(
        id: impl Into<String>,
        operation: OperationType,
        payload: JobPayload,
        options: JobOptions,
        attempts_made: u32,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            id: id.into(),
            operation,
            payload,
            options,
            attempts_made,
            progress,
        }
    }

    /// Backend-assigned job id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Operation this job belongs to.
    pub fn operation(&self) -> OperationType {
        self.operation
    }

    /// Submitted payload.
    pub fn payload(&self) -> &JobPayload {
        &self.payload
    }

    /// Resolved options.
    pub fn options(&self) -> &JobOptions {
        &self.options
    }

    /// Attempts that already failed before this one.
    pub fn attempts_made(&self) -> u32 {
        self.attempts_made
    }

    /// Report progress. Failures are logged and never fail the job.
    pub async fn report_progress(&self, progress: u8) {
        if let Err(e) = self.progress.report(&self.id, progress.min(100)).await {
            warn!(job_id = %self.id, progress, error = %e, "Failed to record job progress");
        }
    }
}

/// Run one attempt under the job's timeout, converting panics into failures.
pub(crate) async fn execute_attempt(
    processor: &Arc<dyn JobProcessor>,
    ctx: &JobContext,
) -> Result<Value, JobExecutionError> {
    let timeout_ms = ctx.options().timeout_ms;
    let attempt = AssertUnwindSafe(processor.process(ctx)).catch_unwind();

    match tokio::time::timeout(Duration::from_millis(timeout_ms), attempt).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(_)) => {
            error!(job_id = %ctx.id(), operation = %ctx.operation(), "Job processor panicked");
            Err(JobExecutionError::Permanent(
                "Job processor panicked".to_string(),
            ))
        }
        Err(_) => Err(JobExecutionError::Transient(format!(
            "Job timed out after {timeout_ms}ms"
        ))),
    }
}
