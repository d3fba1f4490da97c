use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

use device_bridge::{AdbBridge, AdbBridgeConfig, DeviceBridge};
use shared_config::WorkspaceConfig;
use store::{SqliteStore, TaskStore};

mod run_task;

/// One worker process handles exactly one task, invoked by the scheduler
/// as `muse-worker <task-id>`. The device was already bound to the task
/// by the scheduler's QUEUEING -> PREPARING CAS before this process was
/// spawned, so the device id is read back off the task record itself.
#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let Some(task_id_arg) = args.get(1) else {
        eprintln!("usage: muse-worker <task-id>");
        std::process::exit(2);
    };
    let task_id = match Uuid::parse_str(task_id_arg) {
        Ok(id) => id,
        Err(e) => {
            eprintln!("invalid task id {task_id_arg}: {e}");
            std::process::exit(2);
        }
    };

    let config = Arc::new(WorkspaceConfig::load().unwrap_or_else(|e| {
        eprintln!("failed to load config: {e}, using defaults");
        WorkspaceConfig::default()
    }));
    let _log_guard = shared_config::init_logging(&config.logging);

    info!(%task_id, "worker starting");

    let store: Arc<dyn TaskStore> = match SqliteStore::new(&config.store.url).await {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!(%task_id, error = %e, "failed to connect to task store");
            std::process::exit(1);
        }
    };

    let task = match store.find_one(task_id).await {
        Ok(Some(task)) => task,
        Ok(None) => {
            error!(%task_id, "task not found, nothing to do");
            std::process::exit(1);
        }
        Err(e) => {
            error!(%task_id, error = %e, "failed to load task");
            std::process::exit(1);
        }
    };

    let Some(device_id) = task.device_id.clone() else {
        error!(%task_id, "task has no device_id bound, refusing to run");
        std::process::exit(1);
    };

    let bridge: Arc<dyn DeviceBridge> = Arc::new(AdbBridge::new(AdbBridgeConfig {
        binary: config.bridge.binary.clone(),
        device_workspace: config.bridge.device_workspace.clone(),
        poll_interval: std::time::Duration::from_millis(config.timing.poll_interval_ms),
        query_timeout: std::time::Duration::from_secs(config.bridge.query_timeout_seconds),
    }));

    let cancel = CancellationToken::new();
    let sigterm_cancel = cancel.clone();
    #[cfg(unix)]
    tokio::spawn(async move {
        if let Ok(mut term) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            term.recv().await;
            info!(%task_id, "received termination signal, cancelling in-flight device operation");
            sigterm_cancel.cancel();
        }
    });

    run_task::run_task(task, device_id, config, store, bridge, cancel).await;
}
