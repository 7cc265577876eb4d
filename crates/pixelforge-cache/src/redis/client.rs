//! Redis connection management.

use std::time::Duration;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use redis::Client;
use redis::aio::ConnectionManager;
use tracing::{info, warn};

use pixelforge_core::config::redis::RedisConfig;
use pixelforge_core::error::{AppError, ErrorKind};
use pixelforge_core::result::AppResult;

/// Redis client wrapper with connection management.
#[derive(Clone)]
pub struct RedisClient {
    /// Redis connection manager (multiplexed, reconnecting).
    conn: ConnectionManager,
    /// Key prefix for all keys.
    key_prefix: String,
}

impl std::fmt::Debug for RedisClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisClient")
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

impl RedisClient {
    /// Connect using the configured timeout and retry tuning.
    ///
    /// Each attempt is bounded by `connect_timeout_ms`; up to `max_retries`
    /// further attempts follow, `retry_delay_ms` apart.
    pub async fn connect(config: &RedisConfig) -> AppResult<Self> {
        let client = open_client(config)?;
        let timeout = Duration::from_millis(config.connect_timeout_ms);
        let delay = Duration::from_millis(config.retry_delay_ms);
        let mut last_error = AppError::store("Redis connection was never attempted");

        for attempt in 0..=config.max_retries {
            match tokio::time::timeout(timeout, ConnectionManager::new(client.clone())).await {
                Ok(Ok(conn)) => {
                    info!(
                        url = %mask_redis_url(&connection_url(config)),
                        attempt,
                        "Connected to Redis"
                    );
                    return Ok(Self {
                        conn,
                        key_prefix: config.key_prefix.clone(),
                    });
                }
                Ok(Err(e)) => {
                    last_error = store_error("Failed to connect to Redis", e);
                }
                Err(_) => {
                    last_error = AppError::timeout(format!(
                        "Redis connection timed out after {}ms",
                        config.connect_timeout_ms
                    ));
                }
            }

            if attempt < config.max_retries {
                warn!(attempt, error = %last_error, "Redis connection attempt failed, retrying");
                tokio::time::sleep(delay).await;
            }
        }

        Err(last_error)
    }

    /// Get a mutable clone of the connection manager.
    pub fn conn_mut(&self) -> ConnectionManager {
        self.conn.clone()
    }

    /// Return the key prefix.
    pub fn prefix(&self) -> &str {
        &self.key_prefix
    }
}

/// Create a `redis::Client` for the configured endpoint without connecting.
pub fn open_client(config: &RedisConfig) -> AppResult<Client> {
    Client::open(connection_url(config))
        .map_err(|e| store_error("Failed to create Redis client", e))
}

/// Build a `redis://` URL from the connection parameters.
pub fn connection_url(config: &RedisConfig) -> String {
    let auth = match (&config.username, &config.password) {
        (Some(user), Some(pass)) => format!("{}:{}@", encode_userinfo(user), encode_userinfo(pass)),
        (None, Some(pass)) => format!(":{}@", encode_userinfo(pass)),
        (Some(user), None) => format!("{}@", encode_userinfo(user)),
        (None, None) => String::new(),
    };
    format!("redis://{auth}{}:{}/{}", config.host, config.port, config.db)
}

/// Map a Redis error to an AppError.
pub fn store_error(message: &str, e: redis::RedisError) -> AppError {
    AppError::with_source(ErrorKind::Store, format!("{message}: {e}"), e)
}

/// Everything except RFC 3986 unreserved characters.
const USERINFO: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

fn encode_userinfo(raw: &str) -> String {
    utf8_percent_encode(raw, USERINFO).to_string()
}

/// Mask password in Redis URL for safe logging.
fn mask_redis_url(url: &str) -> String {
    if let Some(at_pos) = url.find('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            let scheme_end = url.find("://").map(|p| p + 3).unwrap_or(0);
            if colon_pos >= scheme_end {
                return format!("{}:****@{}", &url[..colon_pos], &url[at_pos + 1..]);
            }
        }
    }
    url.to_string()
}
