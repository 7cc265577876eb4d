//! Application configuration schemas.
//!
//! All configuration structs are deserialized from TOML files via the
//! `config` crate. Each sub-module represents a logical configuration
//! section, and every field carries a serde default so that an empty
//! configuration still produces a runnable setup.

pub mod availability;
pub mod jobs;
pub mod logging;
pub mod queue;
pub mod redis;
pub mod storage;
pub mod worker;

use serde::{Deserialize, Serialize};

use self::availability::AvailabilityConfig;
use self::jobs::JobsConfig;
use self::logging::LoggingConfig;
use self::queue::QueueConfig;
use self::redis::RedisConfig;
use self::storage::StorageConfig;
use self::worker::WorkerConfig;

use crate::error::AppError;

/// Root application configuration.
///
/// This struct is the top-level deserialization target for the merged
/// TOML configuration files (default.toml + environment overlay).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Coordination store connection settings.
    #[serde(default)]
    pub redis: RedisConfig,
    /// Store health probing settings.
    #[serde(default)]
    pub availability: AvailabilityConfig,
    /// Queue gateway settings.
    #[serde(default)]
    pub queue: QueueConfig,
    /// Worker pool settings.
    #[serde(default)]
    pub worker: WorkerConfig,
    /// Default job tunables served by the config-backed settings provider.
    #[serde(default)]
    pub jobs: JobsConfig,
    /// Output artifact settings.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from TOML files.
    ///
    /// Merges the default configuration with an environment-specific overlay
    /// and environment variables prefixed with `PIXELFORGE__`.
    pub fn load(env: &str) -> Result<Self, AppError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("PIXELFORGE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))
    }
}
