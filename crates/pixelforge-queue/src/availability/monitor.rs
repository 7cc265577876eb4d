//! Periodic store health checking with hysteresis.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use pixelforge_core::config::availability::AvailabilityConfig;

use super::probe::{ConnectionParams, StoreProbe};
use super::state::AvailabilityState;

/// Callback fired with the new availability on every transition.
pub type StatusListener = Arc<dyn Fn(bool) + Send + Sync>;

/// Probes the coordination store on an interval and publishes transitions.
///
/// The monitor owns its [`AvailabilityState`]; only [`check`](Self::check),
/// driven by the probe loop, mutates it. A probe that errors, times out, or
/// panics counts as one failure and never stops the loop.
pub struct AvailabilityMonitor {
    probe: Arc<dyn StoreProbe>,
    params: ConnectionParams,
    config: AvailabilityConfig,
    state: Mutex<AvailabilityState>,
    listeners: RwLock<Vec<StatusListener>>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for AvailabilityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AvailabilityMonitor")
            .field("probe", &self.probe)
            .field("host", &self.params.host)
            .field("port", &self.params.port)
            .field("is_available", &self.is_available())
            .finish()
    }
}

impl AvailabilityMonitor {
    /// Create a monitor. Availability starts false until the first probe.
    pub fn new(
        probe: Arc<dyn StoreProbe>,
        params: ConnectionParams,
        config: AvailabilityConfig,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            probe,
            params,
            config,
            state: Mutex::new(AvailabilityState::new(false)),
            listeners: RwLock::new(Vec::new()),
            shutdown,
            task: Mutex::new(None),
        }
    }

    /// Current availability.
    pub fn is_available(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_available
    }

    /// Snapshot of the hysteresis counters.
    pub fn state(&self) -> AvailabilityState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Connection parameters for components that open their own store link.
    pub fn connection_config(&self) -> &ConnectionParams {
        &self.params
    }

    /// Register a transition listener.
    pub fn on_status_changed<F>(&self, listener: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(listener));
    }

    /// Run one probe and adopt its result directly, without hysteresis or
    /// notification. Used once at startup to pick the initial backend.
    pub async fn bootstrap(&self) -> bool {
        let success = self.run_probe().await;
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        *state = AvailabilityState::new(success);
        info!(available = success, "Initial store availability determined");
        success
    }

    /// Run one probe, apply hysteresis, and notify listeners on a flip.
    ///
    /// Returns the availability after this probe.
    pub async fn check(&self) -> bool {
        let success = self.run_probe().await;
        let threshold = self.config.stability_threshold;

        let (flipped, available) = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            (state.record(success, threshold), state.is_available)
        };

        if let Some(now) = flipped {
            if now {
                info!(
                    host = %self.params.host,
                    port = self.params.port,
                    "Coordination store is available again"
                );
            } else {
                warn!(
                    host = %self.params.host,
                    port = self.params.port,
                    threshold,
                    "Coordination store became unavailable"
                );
            }
            self.notify(now);
        }

        available
    }

    /// Spawn the probe loop. Calling it twice has no effect.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.is_some() {
            return;
        }

        let monitor = Arc::downgrade(self);
        let mut shutdown = self.shutdown.subscribe();
        let period = Duration::from_millis(self.config.probe_interval_ms.max(1));

        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; bootstrap already probed.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {
                        let Some(monitor) = monitor.upgrade() else { break };
                        monitor.check().await;
                    }
                }
            }
            debug!("Availability probe loop stopped");
        }));

        info!(interval_ms = period.as_millis() as u64, "Availability monitor started");
    }

    /// Stop the probe loop and wait for it to exit.
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        let handle = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Availability probe loop ended abnormally");
            }
        }
    }

    async fn run_probe(&self) -> bool {
        let timeout = Duration::from_millis(self.config.probe_timeout_ms);
        match AssertUnwindSafe(self.probe.probe(timeout))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                debug!(error = %e, "Store probe failed");
                false
            }
            Err(_) => {
                error!("Store probe panicked");
                false
            }
        }
    }

    fn notify(&self, available: bool) {
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for listener in listeners {
            let call = std::panic::catch_unwind(AssertUnwindSafe(|| listener(available)));
            if call.is_err() {
                error!(available, "Availability listener panicked");
            }
        }
    }
}
