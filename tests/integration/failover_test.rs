//! Integration tests for backend failover driven by the availability monitor.
//!
//! Tests marked `#[ignore]` need a Redis reachable at `PIXELFORGE_TEST_REDIS`
//! (default `127.0.0.1`). Run them with `cargo test -- --ignored`.

mod helpers;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use pixelforge_cache::StaticSettingsProvider;
use pixelforge_core::config::availability::AvailabilityConfig;
use pixelforge_core::config::queue::QueueConfig;
use pixelforge_core::config::redis::RedisConfig;
use pixelforge_core::config::worker::WorkerConfig;
use pixelforge_core::error::{AppError, ErrorKind};
use pixelforge_core::result::AppResult;
use pixelforge_core::types::job::{BackendKind, JobPayload, JobState};
use pixelforge_core::types::operation::OperationType;
use pixelforge_queue::{AvailabilityMonitor, ConnectionParams, LOCAL_ID_PREFIX, QueueGateway, StoreProbe};
use pixelforge_worker::WorkerPool;

use helpers::{StubExecutor, TestPipeline, test_settings, unreachable_redis};

/// Probe whose answer is flipped by the test.
#[derive(Debug)]
struct SwitchProbe {
    up: AtomicBool,
}

impl SwitchProbe {
    fn new(up: bool) -> Arc<Self> {
        Arc::new(Self {
            up: AtomicBool::new(up),
        })
    }

    fn set(&self, up: bool) {
        self.up.store(up, Ordering::SeqCst);
    }
}

#[async_trait]
impl StoreProbe for SwitchProbe {
    async fn probe(&self, _timeout: Duration) -> AppResult<()> {
        if self.up.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AppError::service_unavailable("probe switched off"))
        }
    }
}

struct FailoverApp {
    monitor: AvailabilityMonitor,
    probe: Arc<SwitchProbe>,
    pipeline: TestPipeline,
}

impl FailoverApp {
    async fn new(redis: RedisConfig, executor: StubExecutor, store_up: bool) -> Self {
        let probe = SwitchProbe::new(store_up);
        let monitor = AvailabilityMonitor::new(
            probe.clone(),
            ConnectionParams::from_config(&redis),
            AvailabilityConfig::default(),
        );

        let executor = Arc::new(executor);
        let settings = Arc::new(StaticSettingsProvider::new(test_settings()));
        let gateway = Arc::new(QueueGateway::new(
            redis,
            QueueConfig {
                poll_interval_ms: 20,
                ..QueueConfig::default()
            },
            settings,
        ));
        gateway.attach(&monitor);
        gateway.init(monitor.bootstrap().await).await;

        let pool = Arc::new(
            WorkerPool::with_executor(gateway.clone(), executor.clone(), WorkerConfig::default())
                .expect("Failed to build worker pool"),
        );
        pool.start().await;

        Self {
            monitor,
            probe,
            pipeline: TestPipeline {
                gateway,
                pool,
                executor,
            },
        }
    }

    /// Drive the monitor through `threshold` probes with the given outcome.
    async fn flip(&self, up: bool) {
        self.probe.set(up);
        for _ in 0..AvailabilityConfig::default().stability_threshold {
            self.monitor.check().await;
        }
    }

    async fn wait_backend(&self, kind: BackendKind) {
        for _ in 0..400 {
            if self.pipeline.gateway.backend_kind() == kind {
                // Give the pool time to re-bind after the swap.
                tokio::time::sleep(Duration::from_millis(200)).await;
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("gateway never switched to the {kind} backend");
    }
}

fn live_redis() -> RedisConfig {
    RedisConfig {
        host: std::env::var("PIXELFORGE_TEST_REDIS").unwrap_or_else(|_| "127.0.0.1".to_string()),
        key_prefix: format!("pixelforge-it-{}:", uuid::Uuid::new_v4()),
        ..RedisConfig::default()
    }
}

#[tokio::test]
async fn test_unreachable_store_keeps_serving_locally() {
    // The probe claims the store is up but the connection attempt fails.
    let app = FailoverApp::new(unreachable_redis(), StubExecutor::default(), true).await;
    assert!(app.monitor.is_available());
    assert_eq!(app.pipeline.gateway.backend_kind(), BackendKind::Local);

    app.flip(false).await;
    assert!(!app.monitor.is_available());
    assert_eq!(app.pipeline.gateway.backend_kind(), BackendKind::Local);

    let id = app
        .pipeline
        .submit(OperationType::Compress, JobPayload::for_file("/tmp/uploads/f.jpg"))
        .await;
    assert!(id.starts_with(LOCAL_ID_PREFIX));
    let status = app.pipeline.wait_terminal(&id, OperationType::Compress).await;
    assert_eq!(status.state, JobState::Completed);
    app.pipeline.shutdown().await;
}

#[tokio::test]
#[ignore = "requires a running Redis (PIXELFORGE_TEST_REDIS)"]
async fn test_pipeline_follows_store_outage_and_recovery() {
    let app = FailoverApp::new(live_redis(), StubExecutor::default(), true).await;
    assert_eq!(app.pipeline.gateway.backend_kind(), BackendKind::Distributed);

    let id = app
        .pipeline
        .submit(OperationType::Resize, JobPayload::for_file("/tmp/uploads/d1.png").with_param("width", 8))
        .await;
    assert!(!id.starts_with(LOCAL_ID_PREFIX));
    let status = app.pipeline.wait_terminal(&id, OperationType::Resize).await;
    assert_eq!(status.state, JobState::Completed);
    assert_eq!(status.result.unwrap()["downloadUrl"], "/api/download/d1-out.jpg");

    // Outage: new submissions are served locally.
    app.flip(false).await;
    app.wait_backend(BackendKind::Local).await;
    let id = app
        .pipeline
        .submit(OperationType::Resize, JobPayload::for_file("/tmp/uploads/l1.png").with_param("width", 8))
        .await;
    assert!(id.starts_with(LOCAL_ID_PREFIX));
    let status = app.pipeline.wait_terminal(&id, OperationType::Resize).await;
    assert_eq!(status.state, JobState::Completed);

    // Recovery: submissions go back to the store, local records stay readable.
    app.flip(true).await;
    app.wait_backend(BackendKind::Distributed).await;
    let id2 = app
        .pipeline
        .submit(OperationType::Resize, JobPayload::for_file("/tmp/uploads/d2.png").with_param("width", 8))
        .await;
    assert!(!id2.starts_with(LOCAL_ID_PREFIX));
    let status = app.pipeline.wait_terminal(&id2, OperationType::Resize).await;
    assert_eq!(status.state, JobState::Completed);

    let local = app
        .pipeline
        .gateway
        .job_status(&id, OperationType::Resize)
        .await
        .unwrap();
    assert_eq!(local.state, JobState::Completed);

    app.monitor.stop().await;
    app.pipeline.shutdown().await;
}

#[tokio::test]
#[ignore = "requires a running Redis (PIXELFORGE_TEST_REDIS)"]
async fn test_in_flight_jobs_are_not_duplicated_on_swap() {
    let app = FailoverApp::new(
        live_redis(),
        StubExecutor::slow(Duration::from_millis(300)),
        true,
    )
    .await;
    assert_eq!(app.pipeline.gateway.backend_kind(), BackendKind::Distributed);

    let mut in_flight = Vec::new();
    for i in 0..3 {
        let path = format!("/tmp/uploads/inflight-{i}.jpg");
        let id = app
            .pipeline
            .submit(OperationType::Compress, JobPayload::for_file(&path))
            .await;
        in_flight.push((id, path));
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    app.flip(false).await;
    app.wait_backend(BackendKind::Local).await;

    let id = app
        .pipeline
        .submit(OperationType::Compress, JobPayload::for_file("/tmp/uploads/after.jpg"))
        .await;
    assert!(id.starts_with(LOCAL_ID_PREFIX));
    let status = app.pipeline.wait_terminal(&id, OperationType::Compress).await;
    assert_eq!(status.state, JobState::Completed);

    // Distributed ids cannot be answered while the store is unbound.
    let err = app
        .pipeline
        .gateway
        .job_status(&in_flight[0].0, OperationType::Compress)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::ServiceUnavailable);

    tokio::time::sleep(Duration::from_millis(500)).await;
    for (_, path) in &in_flight {
        assert!(
            app.pipeline.executor.cleanups_of(path) <= 1,
            "{path} ran more than once"
        );
    }
    assert_eq!(app.pipeline.gateway.local_store().len(), 1);

    app.monitor.stop().await;
    app.pipeline.shutdown().await;
}
