//! Worker pool: binds one processor per operation to the gateway's current
//! queues and re-binds after every backend swap.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time;

use pixelforge_core::config::worker::WorkerConfig;
use pixelforge_core::result::AppResult;
use pixelforge_core::traits::transform::TransformExecutor;
use pixelforge_core::types::job::BackendKind;
use pixelforge_core::types::operation::OperationType;
use pixelforge_queue::{
    ConsumerHandle, JobProcessor, LocalQueue, QueueGateway, QueueInstance, spawn_consumer,
};

use crate::processor::TransformProcessor;
use crate::webhook::WebhookNotifier;

/// What a processor is currently attached to.
#[derive(Debug)]
enum Binding {
    Distributed(ConsumerHandle),
    Local(LocalQueue),
}

#[derive(Debug, Default)]
struct Bindings {
    registered: HashMap<OperationType, bool>,
    active: HashMap<OperationType, Binding>,
}

/// Executes jobs for every operation type on whatever backend is bound.
#[derive(Debug)]
pub struct WorkerPool {
    gateway: Arc<QueueGateway>,
    processors: HashMap<OperationType, Arc<dyn JobProcessor>>,
    config: WorkerConfig,
    bindings: Mutex<Bindings>,
    shutdown: watch::Sender<bool>,
    listener: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Create a pool with explicit processors.
    pub fn new(
        gateway: Arc<QueueGateway>,
        processors: HashMap<OperationType, Arc<dyn JobProcessor>>,
        config: WorkerConfig,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            gateway,
            processors,
            config,
            bindings: Mutex::new(Bindings::default()),
            shutdown,
            listener: std::sync::Mutex::new(None),
        }
    }

    /// Create a pool with a [`TransformProcessor`] for every operation type.
    pub fn with_executor(
        gateway: Arc<QueueGateway>,
        executor: Arc<dyn TransformExecutor>,
        config: WorkerConfig,
    ) -> AppResult<Self> {
        let webhook = WebhookNotifier::new(Duration::from_millis(config.webhook_timeout_ms))?;
        let processors = OperationType::ALL
            .into_iter()
            .map(|op| {
                let processor: Arc<dyn JobProcessor> = Arc::new(TransformProcessor::new(
                    op,
                    executor.clone(),
                    webhook.clone(),
                    config.download_base_url.clone(),
                ));
                (op, processor)
            })
            .collect();
        Ok(Self::new(gateway, processors, config))
    }

    /// Register every processor and follow the gateway's swaps.
    pub async fn start(self: &Arc<Self>) {
        // Subscribe first so a swap landing during registration still
        // triggers a rebind.
        let swaps = self.gateway.subscribe();
        self.register_all().await;

        let mut guard = self.listener.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.is_some() {
            return;
        }

        let pool = Arc::downgrade(self);
        let shutdown = self.shutdown.subscribe();
        let delay = Duration::from_millis(self.config.rebind_delay_ms);
        *guard = Some(tokio::spawn(follow_swaps(pool, swaps, shutdown, delay)));

        tracing::info!(
            "Worker pool started with {} processors on the {} backend",
            self.processors.len(),
            self.gateway.backend_kind()
        );
    }

    /// Stop following swaps and detach every processor.
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(listener) = listener {
            if let Err(e) = listener.await {
                tracing::warn!("Worker pool listener ended abnormally: {}", e);
            }
        }

        let mut bindings = self.bindings.lock().await;
        self.release(&mut bindings).await;
        tracing::info!("Worker pool stopped");
    }

    /// Drop every binding and register again against the gateway's current
    /// instances.
    pub async fn rebind(&self) {
        let mut bindings = self.bindings.lock().await;
        self.release(&mut bindings).await;
        self.register(&mut bindings).await;
        tracing::info!(
            "Worker pool re-bound to the {} backend",
            self.gateway.backend_kind()
        );
    }

    /// Whether a processor is registered for `operation`.
    pub async fn is_registered(&self, operation: OperationType) -> bool {
        let bindings = self.bindings.lock().await;
        bindings.registered.get(&operation).copied().unwrap_or(false)
    }

    async fn register_all(&self) {
        let mut bindings = self.bindings.lock().await;
        self.register(&mut bindings).await;
    }

    async fn register(&self, bindings: &mut Bindings) {
        let poll_interval = Duration::from_millis(self.gateway.queue_config().poll_interval_ms);

        for (&operation, processor) in &self.processors {
            if bindings.registered.get(&operation).copied().unwrap_or(false) {
                continue;
            }
            let Some(instance) = self.gateway.instance(operation) else {
                tracing::warn!("No queue bound for '{}', processor not registered", operation);
                continue;
            };

            let binding = match instance {
                QueueInstance::Distributed(queue) => {
                    let concurrency = match self.gateway.concurrency().await {
                        Ok(concurrency) => concurrency,
                        Err(e) => {
                            tracing::warn!("Failed to resolve concurrency, using 1: {}", e);
                            1
                        }
                    };
                    Binding::Distributed(spawn_consumer(
                        queue,
                        processor.clone(),
                        concurrency,
                        poll_interval,
                    ))
                }
                QueueInstance::Local(queue) => {
                    queue.set_processor(processor.clone());
                    Binding::Local(queue)
                }
            };

            bindings.active.insert(operation, binding);
            bindings.registered.insert(operation, true);
            tracing::debug!("Registered processor for '{}'", operation);
        }
    }

    async fn release(&self, bindings: &mut Bindings) {
        let timeout = Duration::from_millis(self.gateway.queue_config().close_timeout_ms);
        for (_, binding) in bindings.active.drain() {
            match binding {
                Binding::Distributed(consumer) => consumer.close(timeout).await,
                Binding::Local(queue) => queue.clear_processor(),
            }
        }
        bindings.registered.clear();
    }
}

async fn follow_swaps(
    pool: Weak<WorkerPool>,
    mut swaps: watch::Receiver<BackendKind>,
    mut shutdown: watch::Receiver<bool>,
    delay: Duration,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            changed = swaps.changed() => {
                if changed.is_err() {
                    break;
                }
                let kind = *swaps.borrow_and_update();
                if kind == BackendKind::Local {
                    // Let the gateway finish its own swap before reading instances.
                    time::sleep(delay).await;
                }
                let Some(pool) = pool.upgrade() else { break };
                pool.rebind().await;
            }
        }
    }
    tracing::debug!("Worker pool stopped following backend swaps");
}
