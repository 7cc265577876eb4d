//! Worker pool configuration.

use serde::{Deserialize, Serialize};

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Whether this process runs consumers at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Delay before re-registering consumers after a swap to the local backend.
    #[serde(default = "default_rebind_delay")]
    pub rebind_delay_ms: u64,
    /// Timeout for a single webhook delivery in milliseconds.
    #[serde(default = "default_webhook_timeout")]
    pub webhook_timeout_ms: u64,
    /// Base path joined with the output file name to form `downloadUrl`.
    #[serde(default = "default_download_base_url")]
    pub download_base_url: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rebind_delay_ms: default_rebind_delay(),
            webhook_timeout_ms: default_webhook_timeout(),
            download_base_url: default_download_base_url(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_rebind_delay() -> u64 {
    100
}

fn default_webhook_timeout() -> u64 {
    10_000
}

fn default_download_base_url() -> String {
    "/api/download".to_string()
}
