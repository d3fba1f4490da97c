use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use device_bridge::{AdbBridge, AdbBridgeConfig, DeviceBridge};
use scheduler::Dispatcher;
use shared_config::WorkspaceConfig;
use store::{DeviceStore, SqliteStore, TaskStore};

#[tokio::main]
async fn main() {
    let config = WorkspaceConfig::load().unwrap_or_else(|e| {
        eprintln!("failed to load config: {e}, using defaults");
        WorkspaceConfig::default()
    });
    let _log_guard = shared_config::init_logging(&config.logging);

    info!("starting scheduler daemon");

    let store = Arc::new(
        SqliteStore::new(&config.store.url)
            .await
            .expect("failed to initialize task store"),
    );
    let task_store: Arc<dyn TaskStore> = store.clone();
    let device_store: Arc<dyn DeviceStore> = store;

    let bridge: Arc<dyn DeviceBridge> = Arc::new(AdbBridge::new(AdbBridgeConfig {
        binary: config.bridge.binary.clone(),
        device_workspace: config.bridge.device_workspace.clone(),
        poll_interval: Duration::from_millis(config.timing.poll_interval_ms),
        query_timeout: Duration::from_secs(config.bridge.query_timeout_seconds),
    }));

    let worker_binary = std::env::var("MUSE_WORKER_BINARY").unwrap_or_else(|_| "muse-worker".to_string());
    let dispatcher = Arc::new(Dispatcher::new(task_store, bridge.clone(), worker_binary));

    let tick_interval = Duration::from_millis(config.timing.tick_interval_ms);
    let staleness_timeout_seconds = config.timing.staleness_timeout_seconds;
    let refresh_interval = Duration::from_secs(config.timing.device_refresh_interval_seconds);

    tokio::select! {
        _ = dispatch_loop(dispatcher, tick_interval, staleness_timeout_seconds) => {}
        _ = device_refresh_loop(bridge, device_store, refresh_interval) => {}
    }
}

/// One 100ms tick does dispatch, then the staleness/kill sweep, then reaps
/// any worker subprocess that has already exited on its own.
async fn dispatch_loop(dispatcher: Arc<Dispatcher>, tick_interval: Duration, staleness_timeout_seconds: i64) {
    let mut interval = tokio::time::interval(tick_interval);
    loop {
        interval.tick().await;

        if let Err(e) = dispatcher.find_task_to_run().await {
            error!(error = %e, "find_task_to_run failed");
        }
        if let Err(e) = dispatcher.find_task_to_kill(staleness_timeout_seconds).await {
            error!(error = %e, "find_task_to_kill failed");
        }
        dispatcher.reap().await;
    }
}

async fn device_refresh_loop(
    bridge: Arc<dyn DeviceBridge>,
    device_store: Arc<dyn DeviceStore>,
    refresh_interval: Duration,
) {
    let mut interval = tokio::time::interval(refresh_interval);
    loop {
        interval.tick().await;
        if let Err(e) = scheduler::device_refresh::refresh_devices(&bridge, &device_store).await {
            error!(error = %e, "device refresh failed");
        }
    }
}
