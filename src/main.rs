//! PixelForge Server: resilient image-processing job pipeline.
//!
//! Main entry point that wires the availability monitor, the queue gateway
//! and the worker pool together and runs until a shutdown signal arrives.

use std::sync::Arc;

use tracing_subscriber::{EnvFilter, fmt};

use pixelforge_cache::StaticSettingsProvider;
use pixelforge_core::config::AppConfig;
use pixelforge_core::error::AppError;
use pixelforge_image::ImageTransformExecutor;
use pixelforge_queue::{AvailabilityMonitor, ConnectionParams, QueueGateway, RedisProbe};
use pixelforge_worker::WorkerPool;

#[tokio::main]
async fn main() {
    let config = match load_configuration() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = run(config).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}

/// Load configuration from files and environment
fn load_configuration() -> Result<AppConfig, AppError> {
    let env = std::env::var("PIXELFORGE_ENV").unwrap_or_else(|_| "development".to_string());
    AppConfig::load(&env)
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

async fn run(config: AppConfig) -> Result<(), AppError> {
    tracing::info!("Starting PixelForge v{}", env!("CARGO_PKG_VERSION"));

    tokio::fs::create_dir_all(&config.storage.output_dir).await?;

    // ── Step 1: Collaborators ────────────────────────────────────
    let settings = Arc::new(StaticSettingsProvider::from_config(&config.jobs));
    let executor = Arc::new(ImageTransformExecutor::from_config(&config.storage));

    // ── Step 2: Availability monitor ─────────────────────────────
    let params = ConnectionParams::from_config(&config.redis);
    let probe = Arc::new(RedisProbe::new(config.redis.clone()));
    let monitor = Arc::new(AvailabilityMonitor::new(
        probe,
        params,
        config.availability.clone(),
    ));
    let available = monitor.bootstrap().await;
    tracing::info!(
        "Coordination store at {}:{} is {}",
        config.redis.host,
        config.redis.port,
        if available { "reachable" } else { "unreachable" }
    );

    // ── Step 3: Queue gateway ────────────────────────────────────
    let redis = monitor
        .connection_config()
        .to_redis_config(&config.redis.key_prefix);
    let gateway = Arc::new(QueueGateway::new(redis, config.queue.clone(), settings));
    gateway.attach(&monitor);
    gateway.init(available).await;

    // ── Step 4: Worker pool ──────────────────────────────────────
    let pool = if config.worker.enabled {
        let pool = Arc::new(WorkerPool::with_executor(
            gateway.clone(),
            executor,
            config.worker.clone(),
        )?);
        pool.start().await;
        Some(pool)
    } else {
        tracing::info!("Worker pool disabled, this instance only submits jobs");
        None
    };

    monitor.start();
    tracing::info!("PixelForge ready on the {} backend", gateway.backend_kind());

    // ── Step 5: Graceful shutdown ────────────────────────────────
    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown...");

    monitor.stop().await;
    if let Some(pool) = pool {
        pool.stop().await;
    }
    gateway.close().await;

    tracing::info!("PixelForge stopped");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
