//! Fire-and-forget completion webhooks.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;

use pixelforge_core::error::{AppError, ErrorKind};
use pixelforge_core::result::AppResult;
use pixelforge_core::types::operation::OperationType;

/// Body POSTed to a job's webhook URL.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookBody<'a> {
    /// Job id.
    pub job_id: &'a str,
    /// Operation the job ran.
    pub operation: OperationType,
    /// Always `completed`; failures are not announced.
    pub status: &'static str,
    /// The job's result.
    pub result: &'a Value,
}

/// Delivers job results to caller-supplied URLs. Never retries.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
}

impl WebhookNotifier {
    /// Create a notifier whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                AppError::with_source(
                    ErrorKind::Configuration,
                    format!("Failed to build webhook client: {e}"),
                    e,
                )
            })?;
        Ok(Self { client })
    }

    /// POST the result once and wait for the answer.
    pub async fn send(
        &self,
        url: &str,
        job_id: &str,
        operation: OperationType,
        result: &Value,
    ) -> AppResult<()> {
        let body = WebhookBody {
            job_id,
            operation,
            status: "completed",
            result,
        };

        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                AppError::with_source(
                    ErrorKind::ExternalService,
                    format!("Webhook request to {url} failed: {e}"),
                    e,
                )
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::external_service(format!(
                "Webhook {url} answered {status}"
            )));
        }
        Ok(())
    }

    /// Deliver in the background. Failures are logged and otherwise ignored.
    pub fn spawn(
        &self,
        url: String,
        job_id: String,
        operation: OperationType,
        result: Value,
    ) -> JoinHandle<()> {
        let notifier = self.clone();
        tokio::spawn(async move {
            match notifier.send(&url, &job_id, operation, &result).await {
                Ok(()) => tracing::debug!("Webhook delivered for job {} to {}", job_id, url),
                Err(e) => tracing::warn!("Webhook for job {} not delivered: {}", job_id, e),
            }
        })
    }
}
