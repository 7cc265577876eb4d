//! Job state, payload, options, and status shapes shared by both backends.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::AppError;
use crate::result::AppResult;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Submitted, not yet picked up.
    Waiting,
    /// Being processed.
    Active,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
}

impl JobState {
    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Return the state as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which kind of backend serves a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Redis-backed, shared between processes.
    Distributed,
    /// In-process fallback.
    Local,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Distributed => write!(f, "distributed"),
            Self::Local => write!(f, "local"),
        }
    }
}

/// Job input as submitted by the caller.
///
/// Single-input operations use `filePath`; batch jobs use `files`. Every
/// other key is an operation parameter and is kept verbatim in `params`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPayload {
    /// Input artifact for single-input operations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
    /// Input artifacts for batch jobs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<PathBuf>,
    /// Where to POST the result once the job completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    /// Operation parameters (quality, width, format, ...).
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl JobPayload {
    /// Payload for a single input file.
    pub fn for_file(path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Payload for a batch of input files.
    pub fn for_files(paths: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            files: paths.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Parse a payload from a JSON object.
    pub fn from_value(value: Value) -> AppResult<Self> {
        if !value.is_object() {
            return Err(AppError::validation("Job payload must be a JSON object"));
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Add an operation parameter.
    pub fn with_param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    /// Attach a webhook URL.
    pub fn with_webhook(mut self, url: impl Into<String>) -> Self {
        self.webhook_url = Some(url.into());
        self
    }

    /// Every input artifact referenced by this payload.
    pub fn inputs(&self) -> Vec<&Path> {
        self.file_path
            .iter()
            .map(PathBuf::as_path)
            .chain(self.files.iter().map(PathBuf::as_path))
            .collect()
    }
}

/// Resolved per-job execution options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOptions {
    /// Total attempts, including the first one.
    pub attempts: u32,
    /// Base delay of the exponential retry backoff.
    pub backoff_delay_ms: u64,
    /// Per-attempt timeout.
    pub timeout_ms: u64,
}

impl JobOptions {
    /// Layer caller-supplied overrides on top of these options.
    pub fn merge(&self, overrides: &JobOptionsOverride) -> Self {
        Self {
            attempts: overrides.attempts.unwrap_or(self.attempts).max(1),
            backoff_delay_ms: overrides.backoff_delay_ms.unwrap_or(self.backoff_delay_ms),
            timeout_ms: overrides.timeout_ms.unwrap_or(self.timeout_ms),
        }
    }

    /// Delay before retry number `attempts_made` (1-based), doubling each time.
    pub fn backoff_for(&self, attempts_made: u32) -> u64 {
        let exponent = attempts_made.saturating_sub(1).min(16);
        self.backoff_delay_ms.saturating_mul(1u64 << exponent)
    }
}

/// Caller-supplied option overrides for a single submission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOptionsOverride {
    /// Override for total attempts.
    #[serde(default)]
    pub attempts: Option<u32>,
    /// Override for backoff delay.
    #[serde(default)]
    pub backoff_delay_ms: Option<u64>,
    /// Override for per-attempt timeout.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Backend-independent view of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    /// Backend-assigned id.
    pub id: String,
    /// Current state.
    pub state: JobState,
    /// Progress percentage, 0..=100.
    pub progress: u8,
    /// Structured result once completed.
    pub result: Option<Value>,
    /// Failure message once failed.
    pub error: Option<String>,
}

/// Per-queue counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    /// Backend currently serving the queue.
    pub backend: BackendKind,
    /// Jobs waiting to be picked up.
    pub waiting: u64,
    /// Jobs being processed.
    pub active: u64,
    /// Retained completed jobs.
    pub completed: u64,
    /// Retained failed jobs.
    pub failed: u64,
}
