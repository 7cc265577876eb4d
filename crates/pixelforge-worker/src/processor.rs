//! Image job processors: one per operation type.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use pixelforge_core::error::{AppError, ErrorKind};
use pixelforge_core::traits::transform::{TransformExecutor, TransformOutput};
use pixelforge_core::types::operation::OperationType;
use pixelforge_core::types::params::{
    BatchParams, CompressParams, ConvertParams, CropParams, ResizeParams,
};
use pixelforge_queue::{JobContext, JobExecutionError, JobProcessor};

use crate::result::{BatchFailure, BatchItem, BatchResult, TransformResult};
use crate::webhook::WebhookNotifier;

/// Runs one operation type against the transform executor.
///
/// Every input artifact is cleaned up exactly once per attempt, whether the
/// transform succeeds, fails, times out, or panics.
#[derive(Debug)]
pub struct TransformProcessor {
    operation: OperationType,
    executor: Arc<dyn TransformExecutor>,
    webhook: WebhookNotifier,
    download_base: String,
}

impl TransformProcessor {
    /// Create a processor for `operation`.
    pub fn new(
        operation: OperationType,
        executor: Arc<dyn TransformExecutor>,
        webhook: WebhookNotifier,
        download_base: impl Into<String>,
    ) -> Self {
        Self {
            operation,
            executor,
            webhook,
            download_base: download_base.into(),
        }
    }

    /// Operation handled by this processor.
    pub fn operation(&self) -> OperationType {
        self.operation
    }

    async fn run(&self, job: &JobContext) -> Result<Value, JobExecutionError> {
        let payload = job.payload();
        match self.operation {
            OperationType::Batch => {
                let params: BatchParams = parse_params(&payload.params)?;
                params.validate().map_err(permanent)?;
                if payload.files.is_empty() {
                    return Err(JobExecutionError::Permanent(
                        "Batch job has no input files".to_string(),
                    ));
                }
                self.run_batch(&payload.files, &params).await
            }
            operation => {
                let input = payload.file_path.as_deref().ok_or_else(|| {
                    JobExecutionError::Permanent(format!(
                        "Missing filePath in {operation} payload"
                    ))
                })?;
                let output = self.transform(operation, input, &payload.params).await?;
                to_value(&TransformResult::new(operation, &output, &self.download_base))
            }
        }
    }

    async fn run_batch(
        &self,
        files: &[PathBuf],
        params: &BatchParams,
    ) -> Result<Value, JobExecutionError> {
        let mut results = Vec::new();
        let mut failed = Vec::new();

        for file in files {
            let input = file.to_string_lossy().into_owned();
            match self.transform(params.operation, file, &params.params).await {
                Ok(output) => results.push(BatchItem {
                    input,
                    result: TransformResult::new(params.operation, &output, &self.download_base),
                }),
                Err(e) => {
                    tracing::warn!("Batch input '{}' failed: {}", input, e);
                    failed.push(BatchFailure {
                        input,
                        error: e.to_string(),
                    });
                }
            }
        }

        if results.is_empty() {
            let first = failed
                .first()
                .map(|f| f.error.clone())
                .unwrap_or_default();
            return Err(JobExecutionError::Transient(format!(
                "All {} batch inputs failed: {}",
                files.len(),
                first
            )));
        }

        to_value(&BatchResult {
            success: true,
            operation: params.operation,
            total: files.len(),
            results,
            failed,
        })
    }

    async fn transform(
        &self,
        operation: OperationType,
        input: &Path,
        params: &Map<String, Value>,
    ) -> Result<TransformOutput, JobExecutionError> {
        let output = match operation {
            OperationType::Compress => {
                let params: CompressParams = parse_params(params)?;
                params.validate().map_err(permanent)?;
                self.executor.compress(input, &params).await
            }
            OperationType::Resize => {
                let params: ResizeParams = parse_params(params)?;
                params.validate().map_err(permanent)?;
                self.executor.resize(input, &params).await
            }
            OperationType::Convert => {
                let params: ConvertParams = parse_params(params)?;
                params.validate().map_err(permanent)?;
                self.executor.convert(input, &params).await
            }
            OperationType::Crop => {
                let params: CropParams = parse_params(params)?;
                params.validate().map_err(permanent)?;
                self.executor.crop(input, &params).await
            }
            OperationType::Batch => {
                return Err(JobExecutionError::Permanent(
                    "A batch cannot contain batches".to_string(),
                ));
            }
        };

        output.map_err(|e| {
            let message = format!("{operation} failed: {e}");
            // The input itself is unusable; another attempt cannot help.
            if e.kind == ErrorKind::Validation {
                JobExecutionError::Permanent(message)
            } else {
                JobExecutionError::Transient(message)
            }
        })
    }
}

#[async_trait]
impl JobProcessor for TransformProcessor {
    async fn process(&self, job: &JobContext) -> Result<Value, JobExecutionError> {
        let inputs: Vec<PathBuf> = job
            .payload()
            .inputs()
            .into_iter()
            .map(Path::to_path_buf)
            .collect();
        let cleanup = CleanupGuard::new(self.executor.clone(), inputs);

        job.report_progress(10).await;
        let outcome = self.run(job).await;
        cleanup.run().await;

        let result = outcome?;
        job.report_progress(90).await;

        if let Some(url) = &job.payload().webhook_url {
            self.webhook
                .spawn(url.clone(), job.id().to_string(), self.operation, result.clone());
        }

        job.report_progress(100).await;
        tracing::info!("Job {} ({}) finished", job.id(), self.operation);
        Ok(result)
    }
}

/// Removes input artifacts once. If dropped before [`run`](Self::run), for
/// example when the attempt times out, cleanup moves to a background task.
struct CleanupGuard {
    executor: Arc<dyn TransformExecutor>,
    paths: Option<Vec<PathBuf>>,
}

impl CleanupGuard {
    fn new(executor: Arc<dyn TransformExecutor>, paths: Vec<PathBuf>) -> Self {
        Self {
            executor,
            paths: Some(paths),
        }
    }

    async fn run(mut self) {
        if let Some(paths) = self.paths.take() {
            cleanup_all(self.executor.as_ref(), &paths).await;
        }
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        let Some(paths) = self.paths.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let executor = self.executor.clone();
                handle.spawn(async move {
                    cleanup_all(executor.as_ref(), &paths).await;
                });
            }
            Err(_) => {
                tracing::warn!("No runtime to clean up {} abandoned inputs", paths.len());
            }
        }
    }
}

async fn cleanup_all(executor: &dyn TransformExecutor, paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = executor.cleanup(path).await {
            tracing::warn!("Failed to clean up '{}': {}", path.display(), e);
        }
    }
}

fn parse_params<T: DeserializeOwned>(params: &Map<String, Value>) -> Result<T, JobExecutionError> {
    serde_json::from_value(Value::Object(params.clone()))
        .map_err(|e| JobExecutionError::Permanent(format!("Invalid operation parameters: {e}")))
}

fn permanent(e: AppError) -> JobExecutionError {
    JobExecutionError::Permanent(e.message)
}

fn to_value<T: serde::Serialize>(result: &T) -> Result<Value, JobExecutionError> {
    serde_json::to_value(result).map_err(|e| JobExecutionError::Internal(e.into()))
}
