//! givesync agent - headless background sync agent.
//!
//! Runs the background context outside any client view: probes connectivity,
//! drains the offline mutation queue when the network returns, and logs
//! sync status. Client shells talk to the same engine through
//! `givesync-core` directly; the agent only keeps the queue moving.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use givesync_core::models::ApiRequest;
use givesync_core::monitor::NetworkMonitor;
use givesync_core::net::{HttpTransport, Transport};
use givesync_core::store::JsonFileStore;
use givesync_core::sync::SyncCoordinator;
use givesync_core::{Engine, EngineConfig};

// ============================================================================
// Constants
// ============================================================================

/// Lightweight endpoint probed to detect connectivity transitions
const HEALTH_PATH: &str = "/api/health";

/// How often the agent logs a status line (in seconds)
const STATUS_INTERVAL_SECS: u64 = 60;

/// Initialize the tracing subscriber for logging.
/// Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug);
/// a daily-rotated file under the data directory keeps history.
fn init_tracing(log_dir: std::path::PathBuf) -> tracing_appender::non_blocking::WorkerGuard {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_appender = tracing_appender::rolling::daily(log_dir, "givesync.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let mut config = match EngineConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config, using defaults: {}", e);
            EngineConfig::default()
        }
    };
    if let Ok(url) = std::env::var("GIVESYNC_API_URL") {
        config.api_base_url = url;
    }
    if let Ok(dir) = std::env::var("GIVESYNC_DATA_DIR") {
        config.data_dir = Some(dir.into());
    }

    let data_dir = config
        .data_dir()
        .context("Could not resolve data directory")?;
    let _log_guard = init_tracing(data_dir.join("logs"));
    info!(api = %config.api_base_url, data_dir = %data_dir.display(), "givesync agent starting");

    let store = Arc::new(JsonFileStore::new(data_dir));
    let transport = Arc::new(HttpTransport::new(
        config.api_base_url.clone(),
        Duration::from_secs(config.request_timeout_secs),
    )?);

    let engine = Engine::new(&config, store, transport.clone(), None);
    let pending = engine.coordinator.pending_count().await;
    info!(pending, "queue loaded from store");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let loop_handle = tokio::spawn(engine.context.run(shutdown_rx.clone()));

    let probe_handle = tokio::spawn(probe_loop(
        transport,
        engine.monitor.clone(),
        Duration::from_secs(config.probe_interval_secs),
        shutdown_rx.clone(),
    ));
    let status_handle = tokio::spawn(status_loop(
        engine.coordinator.clone(),
        engine.monitor.clone(),
        shutdown_rx,
    ));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("shutdown requested");
    let _ = shutdown_tx.send(true);

    let _ = tokio::join!(loop_handle, probe_handle, status_handle);
    info!("givesync agent stopped");
    Ok(())
}

/// Feed the connectivity monitor from a periodic health probe. Any response
/// from the origin counts as online - even an error status means the
/// network path is up.
async fn probe_loop(
    transport: Arc<HttpTransport>,
    monitor: Arc<NetworkMonitor>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let online = match transport.send(&ApiRequest::get(HEALTH_PATH)).await {
            Ok(_) => true,
            Err(e) if !e.is_transient() => true,
            Err(e) => {
                debug!(error = %e, "health probe failed");
                false
            }
        };
        monitor.set_online(online);

        tokio::select! {
            _ = shutdown.changed() => return,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

/// Periodic status line: queue depth, connectivity, last sync times.
async fn status_loop(
    coordinator: Arc<SyncCoordinator>,
    monitor: Arc<NetworkMonitor>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = tokio::time::sleep(Duration::from_secs(STATUS_INTERVAL_SECS)) => {}
        }

        let pending = coordinator.pending_count().await;
        if pending > 0 {
            info!(pending, online = monitor.is_online(), "mutations awaiting sync");
        } else {
            debug!(online = monitor.is_online(), "queue empty");
        }
    }
}
