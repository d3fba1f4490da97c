use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use device_bridge::DeviceBridge;
use shared_config::WorkspaceConfig;
use store::TaskStore;
use task_core::Task;

/// Paths the prepare step touches into existence before anything else
/// runs, so a log-streaming reader opening them finds an empty file
/// rather than a missing one.
pub struct LogPaths {
    pub stdout: PathBuf,
    pub stderr: PathBuf,
}

pub fn prepare_log_paths(config: &WorkspaceConfig, task_id: Uuid, start_time_ms: i64) -> LogPaths {
    let dir = config.cache.log_dir();
    LogPaths {
        stdout: dir.join(format!("{task_id}_{start_time_ms}_out.log")),
        stderr: dir.join(format!("{task_id}_{start_time_ms}_err.log")),
    }
}

/// Runs the six-step worker sequence against one already-PREPARING task.
/// Every status transition the worker is responsible for is attempted as
/// an atomic CAS against the task's current expected status; a lost CAS
/// (e.g. the scheduler already moved the task to KILLING) simply ends
/// this function without touching anything else.
pub async fn run_task(
    task: Task,
    device_id: String,
    config: Arc<WorkspaceConfig>,
    store: Arc<dyn TaskStore>,
    bridge: Arc<dyn DeviceBridge>,
    cancel: CancellationToken,
) {
    let task_id = task.id;
    info!(%task_id, device_id = %device_id, "preparing task");

    std::fs::create_dir_all(config.cache.log_dir()).ok();
    std::fs::create_dir_all(config.cache.input_archive_dir()).ok();
    std::fs::create_dir_all(config.cache.output_archive_dir()).ok();

    let start_time_ms = task
        .start_time
        .map(|t| t.timestamp_millis())
        .unwrap_or_else(|| Utc::now().timestamp_millis());
    let log_paths = prepare_log_paths(&config, task_id, start_time_ms);
    if let Err(e) = std::fs::File::create(&log_paths.stdout) {
        error!(%task_id, error = %e, "failed to touch stdout log file");
    }
    if let Err(e) = std::fs::File::create(&log_paths.stderr) {
        error!(%task_id, error = %e, "failed to touch stderr log file");
    }

    let local_input_tar = config.cache.input_archive_dir().join(format!("{task_id}.tar"));
    let local_output_tar = config.cache.output_archive_dir().join(format!("{task_id}.tar"));

    if let Err(e) = bridge
        .push_data(&device_id, &local_input_tar, &cancel)
        .await
    {
        warn!(%task_id, error = %e, "push data failed");
        if let Err(store_err) = store.cas_preparing_to_push_failed(task_id).await {
            error!(%task_id, error = %store_err, "failed to record push failure");
        }
        return;
    }

    let stdout_str = log_paths.stdout.to_string_lossy().into_owned();
    let stderr_str = log_paths.stderr.to_string_lossy().into_owned();
    match store
        .cas_preparing_to_running(task_id, &stdout_str, &stderr_str)
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            // Lost the race (most likely: the task was killed while still
            // PREPARING). Nothing further for this worker to do.
            info!(%task_id, "preparing->running CAS lost, stopping");
            return;
        }
        Err(e) => {
            error!(%task_id, error = %e, "failed to transition to running");
            return;
        }
    }

    info!(%task_id, "running command on device");
    let cmd_rc = match bridge
        .run(
            &device_id,
            &log_paths.stdout,
            &log_paths.stderr,
            &task.cmd_shell,
            &cancel,
        )
        .await
    {
        Ok(rc) => rc,
        Err(e) => {
            error!(%task_id, error = %e, "device command invocation failed");
            -1
        }
    };
    info!(%task_id, cmd_rc, "command completed");

    let pull_result = bridge
        .pull_data(&device_id, &task.output_files, &local_output_tar, &cancel)
        .await;

    if let Err(e) = pull_result {
        warn!(%task_id, error = %e, "pull data failed, dominates command result");
        if let Err(store_err) = store.cas_running_to_pull_failed(task_id).await {
            error!(%task_id, error = %store_err, "failed to record pull failure");
        }
        return;
    }

    let finish_time = Utc::now();
    let result = if cmd_rc == 0 {
        store.cas_running_to_completed(task_id, finish_time).await
    } else {
        store
            .cas_running_to_nonzero_failed(task_id, finish_time)
            .await
    };

    match result {
        Ok(true) => info!(%task_id, cmd_rc, "task finished"),
        Ok(false) => info!(%task_id, "final CAS lost, task was already moved elsewhere"),
        Err(e) => error!(%task_id, error = %e, "failed to record final task outcome"),
    }
}
