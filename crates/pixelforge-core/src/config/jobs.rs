//! Default job tunables.

use serde::{Deserialize, Serialize};

/// Job tunables used when no external settings source is wired in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Simultaneous executions per operation type on the distributed backend.
    #[serde(default = "default_concurrency")]
    pub worker_concurrency: usize,
    /// Total attempts per job, including the first one.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Per-attempt timeout in milliseconds.
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
    /// Base delay of the exponential retry backoff in milliseconds.
    #[serde(default = "default_backoff_delay")]
    pub backoff_delay_ms: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            worker_concurrency: default_concurrency(),
            retry_attempts: default_retry_attempts(),
            timeout_ms: default_timeout(),
            backoff_delay_ms: default_backoff_delay(),
        }
    }
}

fn default_concurrency() -> usize {
    2
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_timeout() -> u64 {
    120_000
}

fn default_backoff_delay() -> u64 {
    2000
}
