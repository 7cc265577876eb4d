//! Store reachability probes.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use pixelforge_cache::redis::{open_client, store_error};
use pixelforge_core::config::redis::RedisConfig;
use pixelforge_core::error::AppError;
use pixelforge_core::result::AppResult;

/// Connection parameters for anyone that builds their own store link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    /// Store host.
    pub host: String,
    /// Store port.
    pub port: u16,
    /// Optional ACL username.
    pub username: Option<String>,
    /// Optional password.
    pub password: Option<String>,
    /// Logical database index.
    pub db: i64,
    /// Connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Extra connection attempts after the first.
    pub max_retries: u32,
    /// Delay between connection attempts in milliseconds.
    pub retry_delay_ms: u64,
}

impl ConnectionParams {
    /// Extract the parameters from the store configuration.
    pub fn from_config(config: &RedisConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            username: config.username.clone(),
            password: config.password.clone(),
            db: config.db,
            connect_timeout_ms: config.connect_timeout_ms,
            max_retries: config.max_retries,
            retry_delay_ms: config.retry_delay_ms,
        }
    }

    /// Build a store configuration carrying these parameters and `key_prefix`.
    pub fn to_redis_config(&self, key_prefix: &str) -> RedisConfig {
        RedisConfig {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone(),
            db: self.db,
            connect_timeout_ms: self.connect_timeout_ms,
            max_retries: self.max_retries,
            retry_delay_ms: self.retry_delay_ms,
            key_prefix: key_prefix.to_string(),
        }
    }
}

/// One reachability check against the coordination store.
#[async_trait]
pub trait StoreProbe: Send + Sync + std::fmt::Debug + 'static {
    /// Resolve once: `Ok(())` if the store answered in time.
    async fn probe(&self, timeout: Duration) -> AppResult<()>;
}

/// Probe that opens a fresh connection and issues `PING`.
#[derive(Debug, Clone)]
pub struct RedisProbe {
    config: RedisConfig,
}

impl RedisProbe {
    /// Probe the store described by `config`.
    pub fn new(config: RedisConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl StoreProbe for RedisProbe {
    async fn probe(&self, timeout: Duration) -> AppResult<()> {
        let client = open_client(&self.config)?;

        // Connect and PING run as one future, so the timeout and every
        // connection error collapse into a single outcome.
        let attempt = async move {
            let mut conn = client
                .get_multiplexed_async_connection()
                .await
                .map_err(|e| store_error("Probe connection failed", e))?;
            let reply: String = redis::cmd("PING")
                .query_async(&mut conn)
                .await
                .map_err(|e| store_error("Probe PING failed", e))?;
            debug!(reply = %reply, "Store probe answered");
            Ok::<_, AppError>(())
        };

        match tokio::time::timeout(timeout, attempt).await {
            Ok(outcome) => outcome,
            Err(_) => Err(AppError::timeout(format!(
                "Store probe timed out after {}ms",
                timeout.as_millis()
            ))),
        }
    }
}
