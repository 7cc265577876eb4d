//! Integration tests for the submit → execute → status pipeline on the
//! local backend.

mod helpers;

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use pixelforge_core::config::worker::WorkerConfig;
use pixelforge_core::types::job::{BackendKind, JobOptionsOverride, JobPayload, JobState};
use pixelforge_core::types::operation::OperationType;
use pixelforge_queue::LOCAL_ID_PREFIX;

use helpers::{StubExecutor, TestPipeline};

#[tokio::test]
async fn test_local_job_completes_with_download_url() {
    let app = TestPipeline::local(StubExecutor::default()).await;
    assert_eq!(app.gateway.backend_kind(), BackendKind::Local);

    let id = app
        .submit(
            OperationType::Compress,
            JobPayload::for_file("/tmp/uploads/photo.jpg").with_param("quality", 60),
        )
        .await;
    assert!(id.starts_with(LOCAL_ID_PREFIX));

    let status = app.wait_terminal(&id, OperationType::Compress).await;
    assert_eq!(status.state, JobState::Completed);
    assert_eq!(status.progress, 100);

    let result = status.result.expect("completed job carries a result");
    assert_eq!(result["success"], true);
    assert_eq!(result["operation"], "compress");
    assert_eq!(result["downloadUrl"], "/api/download/photo-out.jpg");
    assert_eq!(result["compressionRatio"], 60.0);

    assert_eq!(app.executor.cleanups_of("/tmp/uploads/photo.jpg"), 1);
    app.shutdown().await;
}

#[tokio::test]
async fn test_failed_job_records_error_and_cleans_up() {
    let app = TestPipeline::local(StubExecutor::default()).await;

    let id = app
        .submit(OperationType::Resize, JobPayload::for_file("/tmp/uploads/bad.png").with_param("width", 10))
        .await;

    let status = app.wait_terminal(&id, OperationType::Resize).await;
    assert_eq!(status.state, JobState::Failed);
    let error = status.error.expect("failed job carries an error");
    assert!(error.contains("resize failed"), "unexpected error: {error}");
    assert!(status.result.is_none());

    assert_eq!(app.executor.cleanups_of("/tmp/uploads/bad.png"), 1);
    app.shutdown().await;
}

#[tokio::test]
async fn test_invalid_params_fail_without_running_transform() {
    let app = TestPipeline::local(StubExecutor::default()).await;

    let id = app
        .submit(OperationType::Resize, JobPayload::for_file("/tmp/uploads/a.png"))
        .await;

    let status = app.wait_terminal(&id, OperationType::Resize).await;
    assert_eq!(status.state, JobState::Failed);
    assert!(status.error.unwrap().contains("width or a height"));
    assert_eq!(app.executor.cleanups_of("/tmp/uploads/a.png"), 1);
    app.shutdown().await;
}

#[tokio::test]
async fn test_timed_out_job_fails_and_still_cleans_up() {
    let app = TestPipeline::local(StubExecutor::slow(Duration::from_secs(5))).await;

    let id = app
        .submit_with(
            OperationType::Crop,
            JobPayload::for_file("/tmp/uploads/slow.png")
                .with_param("width", 10)
                .with_param("height", 10),
            JobOptionsOverride {
                timeout_ms: Some(50),
                ..JobOptionsOverride::default()
            },
        )
        .await;

    let status = app.wait_terminal(&id, OperationType::Crop).await;
    assert_eq!(status.state, JobState::Failed);
    assert!(status.error.unwrap().contains("timed out"));

    assert_eq!(app.wait_cleanup("/tmp/uploads/slow.png").await, 1);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(app.executor.cleanups_of("/tmp/uploads/slow.png"), 1);
    app.shutdown().await;
}

#[tokio::test]
async fn test_batch_reports_partial_failures() {
    let app = TestPipeline::local(StubExecutor::default()).await;

    let payload = JobPayload::for_files(["/tmp/uploads/one.jpg", "/tmp/uploads/bad.jpg"])
        .with_param("operation", "convert")
        .with_param("format", "webp");
    let id = app.submit(OperationType::Batch, payload).await;

    let status = app.wait_terminal(&id, OperationType::Batch).await;
    assert_eq!(status.state, JobState::Completed);

    let result = status.result.unwrap();
    assert_eq!(result["total"], 2);
    assert_eq!(result["operation"], "convert");
    assert_eq!(result["results"].as_array().unwrap().len(), 1);
    assert_eq!(result["results"][0]["input"], "/tmp/uploads/one.jpg");
    assert_eq!(result["results"][0]["downloadUrl"], "/api/download/one-out.webp");
    assert_eq!(result["failed"][0]["input"], "/tmp/uploads/bad.jpg");

    assert_eq!(app.executor.cleanups_of("/tmp/uploads/one.jpg"), 1);
    assert_eq!(app.executor.cleanups_of("/tmp/uploads/bad.jpg"), 1);
    app.shutdown().await;
}

#[tokio::test]
async fn test_batch_with_only_failures_fails() {
    let app = TestPipeline::local(StubExecutor::default()).await;

    let id = app
        .submit(
            OperationType::Batch,
            JobPayload::for_files(["/tmp/uploads/bad-1.jpg", "/tmp/uploads/bad-2.jpg"]),
        )
        .await;

    let status = app.wait_terminal(&id, OperationType::Batch).await;
    assert_eq!(status.state, JobState::Failed);
    assert!(status.error.unwrap().starts_with("All 2 batch inputs failed"));
    app.shutdown().await;
}

#[tokio::test]
async fn test_webhook_receives_completed_result() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks/done"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let app = TestPipeline::local(StubExecutor::default()).await;
    let id = app
        .submit(
            OperationType::Convert,
            JobPayload::for_file("/tmp/uploads/pic.png")
                .with_param("format", "webp")
                .with_webhook(format!("{}/hooks/done", server.uri())),
        )
        .await;
    let status = app.wait_terminal(&id, OperationType::Convert).await;
    assert_eq!(status.state, JobState::Completed);

    let mut received = Vec::new();
    for _ in 0..200 {
        received = server.received_requests().await.unwrap_or_default();
        if !received.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(received.len(), 1);

    let body: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(body["jobId"], json!(id));
    assert_eq!(body["operation"], "convert");
    assert_eq!(body["status"], "completed");
    assert_eq!(body["result"]["downloadUrl"], "/api/download/pic-out.webp");
    app.shutdown().await;
}

#[tokio::test]
async fn test_webhook_failure_does_not_fail_job() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let app = TestPipeline::local(StubExecutor::default()).await;
    let id = app
        .submit(
            OperationType::Compress,
            JobPayload::for_file("/tmp/uploads/w.jpg").with_webhook(server.uri()),
        )
        .await;

    let status = app.wait_terminal(&id, OperationType::Compress).await;
    assert_eq!(status.state, JobState::Completed);
    app.shutdown().await;
}

#[tokio::test]
async fn test_rebind_is_idempotent() {
    let app = TestPipeline::local(StubExecutor::default()).await;

    app.pool.rebind().await;
    app.pool.rebind().await;
    for op in OperationType::ALL {
        assert!(app.pool.is_registered(op).await, "{op} not registered");
    }

    let id = app
        .submit(OperationType::Compress, JobPayload::for_file("/tmp/uploads/r.jpg"))
        .await;
    let status = app.wait_terminal(&id, OperationType::Compress).await;
    assert_eq!(status.state, JobState::Completed);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(app.executor.cleanups_of("/tmp/uploads/r.jpg"), 1);

    app.pool.stop().await;
    for op in OperationType::ALL {
        assert!(!app.pool.is_registered(op).await);
    }
    app.gateway.close().await;
}

#[tokio::test]
async fn test_jobs_submitted_without_workers_wait() {
    let app = TestPipeline::local(StubExecutor::default()).await;
    app.pool.stop().await;

    let id = app
        .submit(OperationType::Compress, JobPayload::for_file("/tmp/uploads/q.jpg"))
        .await;
    tokio::time::sleep(Duration::from_millis(30)).await;

    let status = app.gateway.job_status(&id, OperationType::Compress).await.unwrap();
    assert_eq!(status.state, JobState::Waiting);
    assert_eq!(app.executor.cleanups_of("/tmp/uploads/q.jpg"), 0);

    app.pool.rebind().await;
    let status = app.wait_terminal(&id, OperationType::Compress).await;
    assert_eq!(status.state, JobState::Completed);
    app.shutdown().await;
}

#[tokio::test]
async fn test_download_url_uses_configured_base() {
    let worker = WorkerConfig {
        download_base_url: "https://cdn.example.com/files/".to_string(),
        ..WorkerConfig::default()
    };
    let app = TestPipeline::with_worker_config(StubExecutor::default(), worker).await;

    let id = app
        .submit(OperationType::Crop, JobPayload::for_file("/tmp/uploads/c.png")
            .with_param("width", 4)
            .with_param("height", 4))
        .await;
    let status = app.wait_terminal(&id, OperationType::Crop).await;
    assert_eq!(
        status.result.unwrap()["downloadUrl"],
        "https://cdn.example.com/files/c-out.png"
    );
    app.shutdown().await;
}

#[tokio::test]
async fn test_queue_stats_count_local_jobs() {
    let app = TestPipeline::local(StubExecutor::default()).await;

    let ok = app
        .submit(OperationType::Compress, JobPayload::for_file("/tmp/uploads/s1.jpg"))
        .await;
    let bad = app
        .submit(OperationType::Compress, JobPayload::for_file("/tmp/uploads/bad-s.jpg"))
        .await;
    app.wait_terminal(&ok, OperationType::Compress).await;
    app.wait_terminal(&bad, OperationType::Compress).await;

    let stats = app.gateway.queue_stats().await.unwrap();
    let compress = &stats[&OperationType::Compress];
    assert_eq!(compress.backend, BackendKind::Local);
    assert_eq!(compress.completed, 1);
    assert_eq!(compress.failed, 1);
    assert_eq!(compress.waiting + compress.active, 0);
    assert_eq!(stats[&OperationType::Resize].completed, 0);
    app.shutdown().await;
}
