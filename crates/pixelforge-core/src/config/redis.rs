//! Coordination store (Redis) connection configuration.

use serde::{Deserialize, Serialize};

/// Redis connection configuration.
///
/// Shared by the availability probe and the distributed queue backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis host name or address.
    #[serde(default = "default_host")]
    pub host: String,
    /// Redis port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Optional ACL user name.
    #[serde(default)]
    pub username: Option<String>,
    /// Optional password.
    #[serde(default)]
    pub password: Option<String>,
    /// Logical database index.
    #[serde(default)]
    pub db: i64,
    /// Timeout for a single connection attempt in milliseconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Number of additional connection attempts after the first failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay between connection attempts in milliseconds.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
    /// Key prefix for all PixelForge queue keys.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            username: None,
            password: None,
            db: 0,
            connect_timeout_ms: default_connect_timeout(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay(),
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    6379
}

fn default_connect_timeout() -> u64 {
    3000
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_delay() -> u64 {
    500
}

fn default_key_prefix() -> String {
    "pixelforge:".to_string()
}
