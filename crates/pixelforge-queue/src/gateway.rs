//! Queue gateway: one queue per operation, bound to whichever backend is
//! currently usable.
//!
//! The whole set of instances is swapped at once behind a lock, so callers
//! always see every operation bound to the same backend. Switching to the
//! local backend is synchronous; switching back runs in the background and
//! is guarded so only one attempt is in flight.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use pixelforge_cache::OptionsCache;
use pixelforge_cache::redis::RedisClient;
use pixelforge_core::config::queue::QueueConfig;
use pixelforge_core::config::redis::RedisConfig;
use pixelforge_core::error::AppError;
use pixelforge_core::result::AppResult;
use pixelforge_core::traits::settings::SettingsProvider;
use pixelforge_core::types::job::{
    BackendKind, JobOptionsOverride, JobPayload, JobStatus, QueueCounts,
};
use pixelforge_core::types::operation::OperationType;

use crate::availability::AvailabilityMonitor;
use crate::backend::{JobQueue, LOCAL_ID_PREFIX, LocalJobStore, LocalQueue, QueueInstance, RedisQueue};

#[derive(Debug)]
struct QueueSet {
    kind: BackendKind,
    queues: HashMap<OperationType, QueueInstance>,
}

impl QueueSet {
    fn get(&self, operation: OperationType) -> AppResult<&QueueInstance> {
        self.queues.get(&operation).ok_or_else(|| {
            AppError::service_unavailable(format!("No queue bound for operation {operation}"))
        })
    }
}

/// Resets the swap flag when a swap attempt ends, however it ends.
struct SwapGuard<'a>(&'a AtomicBool);

impl Drop for SwapGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Routes submissions and status lookups to the bound backend.
pub struct QueueGateway {
    current: RwLock<Arc<QueueSet>>,
    local_store: LocalJobStore,
    redis: RedisConfig,
    config: QueueConfig,
    settings: Arc<dyn SettingsProvider>,
    options: OptionsCache,
    swapping: AtomicBool,
    store_available: AtomicBool,
    backend_tx: watch::Sender<BackendKind>,
}

impl std::fmt::Debug for QueueGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueGateway")
            .field("backend", &self.backend_kind())
            .field("local_jobs", &self.local_store.len())
            .field("swapping", &self.swapping.load(Ordering::SeqCst))
            .finish()
    }
}

impl QueueGateway {
    /// Create a gateway bound to local instances.
    ///
    /// `redis` describes the store to connect to when it becomes available,
    /// typically built from [`AvailabilityMonitor::connection_config`].
    pub fn new(
        redis: RedisConfig,
        config: QueueConfig,
        settings: Arc<dyn SettingsProvider>,
    ) -> Self {
        let local_store = LocalJobStore::new();
        let options = OptionsCache::from_config(&config);
        let initial = Self::local_set(&local_store, &config);
        let (backend_tx, _) = watch::channel(BackendKind::Local);

        Self {
            current: RwLock::new(Arc::new(initial)),
            local_store,
            redis,
            config,
            settings,
            options,
            swapping: AtomicBool::new(false),
            store_available: AtomicBool::new(false),
            backend_tx,
        }
    }

    /// Pick the initial backend from the monitor's first probe.
    pub async fn init(&self, store_available: bool) {
        self.store_available.store(store_available, Ordering::SeqCst);
        if store_available {
            self.swap_to_distributed().await;
        }
        info!(backend = %self.backend_kind(), "Queue gateway initialised");
    }

    /// Follow the monitor's availability transitions.
    pub fn attach(self: &Arc<Self>, monitor: &AvailabilityMonitor) {
        let gateway = Arc::downgrade(self);
        monitor.on_status_changed(move |available| {
            let Some(gateway) = gateway.upgrade() else {
                return;
            };
            if available {
                gateway.store_available.store(true, Ordering::SeqCst);
                tokio::spawn(async move {
                    gateway.swap_to_distributed().await;
                });
            } else {
                gateway.swap_to_local();
            }
        });
    }

    /// Replace distributed instances with fresh local ones.
    ///
    /// The replacement is synchronous; the abandoned instances are closed in
    /// the background, each bounded by the close timeout.
    pub fn swap_to_local(&self) {
        self.store_available.store(false, Ordering::SeqCst);

        let abandoned = {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            if current.kind == BackendKind::Local {
                return;
            }
            let fresh = Arc::new(Self::local_set(&self.local_store, &self.config));
            std::mem::replace(&mut *current, fresh)
        };

        self.backend_tx.send_replace(BackendKind::Local);
        warn!("Queue gateway switched to the local backend");

        self.close_in_background(abandoned);
    }

    /// Replace local instances with distributed ones.
    ///
    /// If the store cannot be reached, or becomes unavailable while the
    /// instances are being built, the gateway stays on local instances.
    pub async fn swap_to_distributed(&self) {
        if self
            .swapping
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Swap to distributed backend already in progress");
            return;
        }
        let _guard = SwapGuard(&self.swapping);

        if self.backend_kind() == BackendKind::Distributed {
            return;
        }

        let client = match RedisClient::connect(&self.redis).await {
            Ok(client) => client,
            Err(e) => {
                warn!(error = %e, "Could not build distributed queues, staying on local backend");
                return;
            }
        };

        let queues = OperationType::ALL
            .into_iter()
            .map(|op| {
                (
                    op,
                    QueueInstance::Distributed(RedisQueue::new(client.clone(), op, &self.config)),
                )
            })
            .collect();
        let fresh = Arc::new(QueueSet {
            kind: BackendKind::Distributed,
            queues,
        });

        let abandoned = {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            if !self.store_available.load(Ordering::SeqCst) {
                warn!("Store became unavailable while connecting, discarding distributed queues");
                return;
            }
            std::mem::replace(&mut *current, fresh)
        };

        self.backend_tx.send_replace(BackendKind::Distributed);
        info!("Queue gateway switched to the distributed backend");

        self.close_in_background(abandoned);
    }

    /// Submit a job and return its backend-assigned id.
    pub async fn add_job(
        &self,
        operation: OperationType,
        payload: JobPayload,
        overrides: Option<JobOptionsOverride>,
    ) -> AppResult<String> {
        let options = self.options.job_options(self.settings.as_ref()).await?;
        let options = match overrides {
            Some(overrides) => options.merge(&overrides),
            None => options,
        };

        let set = self.current();
        let result = set.get(operation)?.add(payload.clone(), options).await;

        match result {
            Ok(id) => {
                debug!(job_id = %id, operation = %operation, backend = %set.kind, "Job submitted");
                Ok(id)
            }
            Err(e) => {
                // A swap may have closed the instance under us; use the new one.
                let latest = self.current();
                if Arc::ptr_eq(&set, &latest) {
                    return Err(e);
                }
                warn!(
                    operation = %operation,
                    backend = %latest.kind,
                    error = %e,
                    "Backend swapped during submission, resubmitting"
                );
                latest.get(operation)?.add(payload, options).await
            }
        }
    }

    /// Normalised status of a job.
    ///
    /// Local ids are answered from the local store regardless of the bound
    /// backend. Distributed ids need the distributed backend to be bound.
    pub async fn job_status(&self, id: &str, operation: OperationType) -> AppResult<JobStatus> {
        if id.starts_with(LOCAL_ID_PREFIX) {
            return self
                .local_store
                .status(id)
                .ok_or_else(|| AppError::not_found(format!("Job {id} not found")));
        }

        let set = self.current();
        match set.get(operation)? {
            QueueInstance::Distributed(queue) => queue
                .get_job(id)
                .await?
                .ok_or_else(|| AppError::not_found(format!("Job {id} not found"))),
            QueueInstance::Local(_) => Err(AppError::service_unavailable(format!(
                "Job {id} belongs to the distributed backend, which is unavailable"
            ))),
        }
    }

    /// Counters for every operation.
    pub async fn queue_stats(&self) -> AppResult<BTreeMap<OperationType, QueueCounts>> {
        let set = self.current();
        let mut stats = BTreeMap::new();
        for operation in OperationType::ALL {
            stats.insert(operation, set.get(operation)?.counts().await?);
        }
        Ok(stats)
    }

    /// Drop cached options here and in the settings provider.
    pub fn clear_options_cache(&self) {
        self.options.invalidate();
        self.settings.invalidate();
        info!("Job options cache cleared");
    }

    /// Concurrency ceiling per operation for distributed consumers.
    pub async fn concurrency(&self) -> AppResult<usize> {
        self.options.concurrency(self.settings.as_ref()).await
    }

    /// The instance currently bound to `operation`.
    pub fn instance(&self, operation: OperationType) -> Option<QueueInstance> {
        self.current().queues.get(&operation).cloned()
    }

    /// Backend currently bound.
    pub fn backend_kind(&self) -> BackendKind {
        self.current().kind
    }

    /// Receive a notification after every backend swap.
    pub fn subscribe(&self) -> watch::Receiver<BackendKind> {
        self.backend_tx.subscribe()
    }

    /// Queue settings.
    pub fn queue_config(&self) -> &QueueConfig {
        &self.config
    }

    /// Records of the local backend.
    pub fn local_store(&self) -> &LocalJobStore {
        &self.local_store
    }

    /// Close every bound instance.
    pub async fn close(&self) {
        let set = self.current();
        close_all(&set, self.close_timeout()).await;
        info!("Queue gateway closed");
    }

    fn current(&self) -> Arc<QueueSet> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.config.close_timeout_ms)
    }

    fn close_in_background(&self, set: Arc<QueueSet>) {
        let timeout = self.close_timeout();
        tokio::spawn(async move {
            close_all(&set, timeout).await;
        });
    }

    fn local_set(store: &LocalJobStore, config: &QueueConfig) -> QueueSet {
        let retention = Duration::from_secs(config.local_retention_seconds);
        let queues = OperationType::ALL
            .into_iter()
            .map(|op| (op, QueueInstance::Local(LocalQueue::new(op, store.clone(), retention))))
            .collect();
        QueueSet {
            kind: BackendKind::Local,
            queues,
        }
    }
}

/// Best-effort close; a slow or failing instance is logged and skipped.
async fn close_all(set: &QueueSet, timeout: Duration) {
    for (operation, instance) in &set.queues {
        match tokio::time::timeout(timeout, instance.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(operation = %operation, backend = %set.kind, error = %e, "Queue close failed");
            }
            Err(_) => {
                debug!(
                    operation = %operation,
                    backend = %set.kind,
                    timeout_ms = timeout.as_millis() as u64,
                    "Queue close timed out"
                );
            }
        }
    }
}
