//! Shared test helpers for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use pixelforge_cache::StaticSettingsProvider;
use pixelforge_core::config::queue::QueueConfig;
use pixelforge_core::config::redis::RedisConfig;
use pixelforge_core::config::worker::WorkerConfig;
use pixelforge_core::error::AppError;
use pixelforge_core::result::AppResult;
use pixelforge_core::traits::settings::JobSettings;
use pixelforge_core::traits::transform::{TransformExecutor, TransformOutput};
use pixelforge_core::types::job::{JobOptionsOverride, JobPayload, JobStatus};
use pixelforge_core::types::operation::OperationType;
use pixelforge_core::types::params::{CompressParams, ConvertParams, CropParams, ResizeParams};
use pixelforge_queue::QueueGateway;
use pixelforge_worker::WorkerPool;

/// Executor that fabricates outputs without touching pixels.
///
/// Inputs whose file name contains `bad` fail. Every cleanup call is counted
/// per path.
#[derive(Debug, Default)]
pub struct StubExecutor {
    delay: Duration,
    cleanups: Mutex<HashMap<PathBuf, usize>>,
}

impl StubExecutor {
    /// Executor whose transforms take `delay`.
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// How many times `path` was cleaned up.
    pub fn cleanups_of(&self, path: impl AsRef<Path>) -> usize {
        self.cleanups
            .lock()
            .unwrap()
            .get(path.as_ref())
            .copied()
            .unwrap_or(0)
    }

    async fn fabricate(&self, input: &Path, ext: &str) -> AppResult<TransformOutput> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let name = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        if name.contains("bad") {
            return Err(AppError::internal(format!("cannot decode {name}")));
        }
        Ok(TransformOutput {
            output_path: PathBuf::from(format!("/var/pixelforge/output/{name}-out.{ext}")),
            original_size: 1000,
            output_size: 400,
            width: Some(100),
            height: Some(50),
            format: Some(ext.to_string()),
        })
    }
}

#[async_trait]
impl TransformExecutor for StubExecutor {
    async fn compress(&self, input: &Path, _params: &CompressParams) -> AppResult<TransformOutput> {
        self.fabricate(input, "jpg").await
    }

    async fn resize(&self, input: &Path, _params: &ResizeParams) -> AppResult<TransformOutput> {
        self.fabricate(input, "jpg").await
    }

    async fn convert(&self, input: &Path, params: &ConvertParams) -> AppResult<TransformOutput> {
        self.fabricate(input, &params.format).await
    }

    async fn crop(&self, input: &Path, _params: &CropParams) -> AppResult<TransformOutput> {
        self.fabricate(input, "png").await
    }

    async fn cleanup(&self, path: &Path) -> AppResult<()> {
        *self
            .cleanups
            .lock()
            .unwrap()
            .entry(path.to_path_buf())
            .or_insert(0) += 1;
        Ok(())
    }
}

/// Job tunables used across the tests.
pub fn test_settings() -> JobSettings {
    JobSettings {
        worker_concurrency: 2,
        job_retry_attempts: 1,
        job_timeout_ms: 5_000,
        job_backoff_delay_ms: 50,
    }
}

/// A store nobody listens on.
pub fn unreachable_redis() -> RedisConfig {
    RedisConfig {
        port: 1,
        connect_timeout_ms: 100,
        max_retries: 0,
        ..RedisConfig::default()
    }
}

/// Gateway plus worker pool wired the way the server wires them.
pub struct TestPipeline {
    pub gateway: Arc<QueueGateway>,
    pub pool: Arc<WorkerPool>,
    pub executor: Arc<StubExecutor>,
}

impl TestPipeline {
    /// Pipeline bound to the local backend.
    pub async fn local(executor: StubExecutor) -> Self {
        Self::with_worker_config(executor, WorkerConfig::default()).await
    }

    /// Pipeline bound to the local backend with custom worker settings.
    pub async fn with_worker_config(executor: StubExecutor, worker: WorkerConfig) -> Self {
        let executor = Arc::new(executor);
        let settings = Arc::new(StaticSettingsProvider::new(test_settings()));
        let gateway = Arc::new(QueueGateway::new(
            unreachable_redis(),
            QueueConfig::default(),
            settings,
        ));
        gateway.init(false).await;

        let pool = Arc::new(
            WorkerPool::with_executor(gateway.clone(), executor.clone(), worker)
                .expect("Failed to build worker pool"),
        );
        pool.start().await;

        Self {
            gateway,
            pool,
            executor,
        }
    }

    /// Submit a job with default options.
    pub async fn submit(&self, operation: OperationType, payload: JobPayload) -> String {
        self.gateway
            .add_job(operation, payload, None)
            .await
            .expect("Failed to submit job")
    }

    /// Submit a job with option overrides.
    pub async fn submit_with(
        &self,
        operation: OperationType,
        payload: JobPayload,
        overrides: JobOptionsOverride,
    ) -> String {
        self.gateway
            .add_job(operation, payload, Some(overrides))
            .await
            .expect("Failed to submit job")
    }

    /// Poll until the job is completed or failed.
    pub async fn wait_terminal(&self, id: &str, operation: OperationType) -> JobStatus {
        for _ in 0..400 {
            let status = self
                .gateway
                .job_status(id, operation)
                .await
                .expect("Failed to read job status");
            if status.state.is_terminal() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {id} never reached a terminal state");
    }

    /// Poll until `path` has been cleaned up at least once.
    pub async fn wait_cleanup(&self, path: &str) -> usize {
        for _ in 0..400 {
            let count = self.executor.cleanups_of(path);
            if count > 0 {
                return count;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        0
    }

    /// Stop the pool and close the gateway.
    pub async fn shutdown(&self) {
        self.pool.stop().await;
        self.gateway.close().await;
    }
}
