//! Store availability probing configuration.

use serde::{Deserialize, Serialize};

/// Health probe configuration for the coordination store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityConfig {
    /// Interval between probes in milliseconds.
    #[serde(default = "default_probe_interval")]
    pub probe_interval_ms: u64,
    /// Upper bound for a single probe in milliseconds.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,
    /// Consecutive identical probe results required before flipping state.
    #[serde(default = "default_stability_threshold")]
    pub stability_threshold: u32,
}

impl Default for AvailabilityConfig {
    fn default() -> Self {
        Self {
            probe_interval_ms: default_probe_interval(),
            probe_timeout_ms: default_probe_timeout(),
            stability_threshold: default_stability_threshold(),
        }
    }
}

fn default_probe_interval() -> u64 {
    3000
}

fn default_probe_timeout() -> u64 {
    3000
}

fn default_stability_threshold() -> u32 {
    3
}
