//! Settings provider trait for job tunables.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::result::AppResult;

/// Job tunables as served by a settings source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSettings {
    /// Simultaneous executions per operation type.
    pub worker_concurrency: usize,
    /// Total attempts per job.
    pub job_retry_attempts: u32,
    /// Per-attempt timeout in milliseconds.
    pub job_timeout_ms: u64,
    /// Base retry backoff in milliseconds.
    pub job_backoff_delay_ms: u64,
}

/// Source of job tunables.
///
/// Implementations may keep their own cache; `invalidate` is called when the
/// configuration behind them changes.
#[async_trait]
pub trait SettingsProvider: Send + Sync + std::fmt::Debug + 'static {
    /// Fetch the current settings.
    async fn get_settings(&self) -> AppResult<JobSettings>;

    /// Drop any provider-side cached copy.
    fn invalidate(&self) {}
}
