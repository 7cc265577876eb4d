//! Queue gateway configuration.

use serde::{Deserialize, Serialize};

/// Queue gateway and backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Per-instance timeout when closing an abandoned backend, in milliseconds.
    #[serde(default = "default_close_timeout")]
    pub close_timeout_ms: u64,
    /// TTL of cached job options in seconds.
    #[serde(default = "default_options_ttl")]
    pub options_ttl_seconds: u64,
    /// TTL of the cached worker concurrency in seconds.
    #[serde(default = "default_concurrency_ttl")]
    pub concurrency_ttl_seconds: u64,
    /// How long finished distributed jobs are kept after completion, in seconds.
    #[serde(default = "default_completed_retention")]
    pub completed_retention_seconds: u64,
    /// How long failed distributed jobs are kept, in seconds.
    #[serde(default = "default_failed_retention")]
    pub failed_retention_seconds: u64,
    /// How long finished local records are kept, in seconds.
    #[serde(default = "default_local_retention")]
    pub local_retention_seconds: u64,
    /// Interval between polls of an empty distributed queue, in milliseconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            close_timeout_ms: default_close_timeout(),
            options_ttl_seconds: default_options_ttl(),
            concurrency_ttl_seconds: default_concurrency_ttl(),
            completed_retention_seconds: default_completed_retention(),
            failed_retention_seconds: default_failed_retention(),
            local_retention_seconds: default_local_retention(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

fn default_close_timeout() -> u64 {
    1500
}

fn default_options_ttl() -> u64 {
    30
}

fn default_concurrency_ttl() -> u64 {
    60
}

fn default_completed_retention() -> u64 {
    24 * 3600
}

fn default_failed_retention() -> u64 {
    7 * 24 * 3600
}

fn default_local_retention() -> u64 {
    3600
}

fn default_poll_interval() -> u64 {
    250
}
