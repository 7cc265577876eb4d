//! Job options cached in front of a settings provider.

use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use tracing::debug;

use pixelforge_core::config::jobs::JobsConfig;
use pixelforge_core::config::queue::QueueConfig;
use pixelforge_core::error::AppError;
use pixelforge_core::result::AppResult;
use pixelforge_core::traits::settings::{JobSettings, SettingsProvider};
use pixelforge_core::types::job::JobOptions;

const OPTIONS_KEY: &str = "job-options";
const CONCURRENCY_KEY: &str = "worker-concurrency";

/// Short-lived cache of resolved job options and worker concurrency.
///
/// Options and concurrency have separate TTLs; both are dropped by
/// [`OptionsCache::invalidate`].
#[derive(Debug, Clone)]
pub struct OptionsCache {
    options: Cache<&'static str, JobOptions>,
    concurrency: Cache<&'static str, usize>,
}

impl OptionsCache {
    /// Create a cache with explicit TTLs.
    pub fn new(options_ttl: Duration, concurrency_ttl: Duration) -> Self {
        Self {
            options: Cache::builder()
                .max_capacity(1)
                .time_to_live(options_ttl)
                .build(),
            concurrency: Cache::builder()
                .max_capacity(1)
                .time_to_live(concurrency_ttl)
                .build(),
        }
    }

    /// Create a cache from the queue configuration.
    pub fn from_config(config: &QueueConfig) -> Self {
        Self::new(
            Duration::from_secs(config.options_ttl_seconds),
            Duration::from_secs(config.concurrency_ttl_seconds),
        )
    }

    /// Resolve job options, calling the provider only on a miss.
    pub async fn job_options(&self, provider: &dyn SettingsProvider) -> AppResult<JobOptions> {
        self.options
            .try_get_with(OPTIONS_KEY, async {
                let settings = provider.get_settings().await?;
                debug!(?settings, "Refreshed job options from settings provider");
                Ok::<_, AppError>(JobOptions {
                    attempts: settings.job_retry_attempts.max(1),
                    backoff_delay_ms: settings.job_backoff_delay_ms,
                    timeout_ms: settings.job_timeout_ms,
                })
            })
            .await
            .map_err(|e| (*e).clone())
    }

    /// Resolve the per-operation concurrency ceiling, at least 1.
    pub async fn concurrency(&self, provider: &dyn SettingsProvider) -> AppResult<usize> {
        self.concurrency
            .try_get_with(CONCURRENCY_KEY, async {
                let settings = provider.get_settings().await?;
                Ok::<_, AppError>(settings.worker_concurrency.max(1))
            })
            .await
            .map_err(|e| (*e).clone())
    }

    /// Drop every cached value.
    pub fn invalidate(&self) {
        self.options.invalidate_all();
        self.concurrency.invalidate_all();
        debug!("Job options cache invalidated");
    }
}

/// Settings provider backed by the `[jobs]` configuration section.
#[derive(Debug, Clone)]
pub struct StaticSettingsProvider {
    settings: JobSettings,
}

impl StaticSettingsProvider {
    /// Serve the given settings.
    pub fn new(settings: JobSettings) -> Self {
        Self { settings }
    }

    /// Serve the settings from configuration.
    pub fn from_config(config: &JobsConfig) -> Self {
        Self::new(JobSettings {
            worker_concurrency: config.worker_concurrency,
            job_retry_attempts: config.retry_attempts,
            job_timeout_ms: config.timeout_ms,
            job_backoff_delay_ms: config.backoff_delay_ms,
        })
    }
}

#[async_trait]
impl SettingsProvider for StaticSettingsProvider {
    async fn get_settings(&self) -> AppResult<JobSettings> {
        Ok(self.settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct CountingProvider {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl SettingsProvider for CountingProvider {
        async fn get_settings(&self) -> AppResult<JobSettings> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(AppError::external_service("settings store offline"));
            }
            Ok(JobSettings {
                worker_concurrency: 0,
                job_retry_attempts: 4,
                job_timeout_ms: 5000,
                job_backoff_delay_ms: 250,
            })
        }
    }

    fn make_cache() -> OptionsCache {
        OptionsCache::new(Duration::from_secs(30), Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_options_are_cached_until_invalidated() {
        let cache = make_cache();
        let provider = CountingProvider::default();

        let first = cache.job_options(&provider).await.unwrap();
        let second = cache.job_options(&provider).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.attempts, 4);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        cache.invalidate();
        cache.job_options(&provider).await.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrency_has_floor_of_one() {
        let cache = make_cache();
        let provider = CountingProvider::default();
        assert_eq!(cache.concurrency(&provider).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_options_expire_after_ttl() {
        let cache = OptionsCache::new(Duration::from_millis(50), Duration::from_secs(60));
        let provider = CountingProvider::default();

        cache.job_options(&provider).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        cache.job_options(&provider).await.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_provider_errors_are_not_cached() {
        let cache = make_cache();
        let provider = CountingProvider {
            fail: true,
            ..Default::default()
        };

        assert!(cache.job_options(&provider).await.is_err());
        assert!(cache.job_options(&provider).await.is_err());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_static_provider_maps_config() {
        let provider = StaticSettingsProvider::from_config(&JobsConfig::default());
        let settings = provider.get_settings().await.unwrap();
        assert_eq!(settings.job_retry_attempts, 3);
        assert_eq!(settings.worker_concurrency, 2);
    }
}
