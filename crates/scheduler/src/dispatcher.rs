use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use device_bridge::DeviceBridge;
use store::TaskStore;
use task_core::TaskStatus;

use crate::error::Result;

/// Assigns queued tasks to free devices, detects and kills stale or
/// explicitly-killed tasks, and reaps finished worker subprocesses. One
/// instance runs per scheduler daemon; its tick methods are driven by the
/// main loop in `main.rs`.
pub struct Dispatcher {
    store: Arc<dyn TaskStore>,
    bridge: Arc<dyn DeviceBridge>,
    worker_binary: String,
    workers: Mutex<HashMap<Uuid, Child>>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn TaskStore>, bridge: Arc<dyn DeviceBridge>, worker_binary: String) -> Self {
        Self {
            store,
            bridge,
            worker_binary,
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// `find_task_to_run`: enumerate attached devices, read one queued
    /// task with its archive ready, pin it to its `hint_device_id` if that
    /// device is attached and not busy, else fail it immediately.
    pub async fn find_task_to_run(&self) -> Result<bool> {
        let available_devices = self.bridge.list_devices().await;

        let Some(task) = self.store.find_queueing_ready().await? else {
            return Ok(false);
        };

        let busy: HashSet<String> = self
            .store
            .find_by_statuses(&[TaskStatus::Preparing, TaskStatus::Running, TaskStatus::Killing])
            .await?
            .into_iter()
            .filter_map(|t| t.device_id)
            .collect();

        let selected = available_devices
            .iter()
            .find(|d| **d == task.hint_device_id && !busy.contains(*d))
            .cloned();

        let Some(device_id) = selected else {
            warn!(task_id = %task.id, hint_device_id = %task.hint_device_id, "device unavailable");
            self.store
                .cas_queueing_to_device_unavailable(task.id, Utc::now())
                .await?;
            return Ok(false);
        };

        let now = Utc::now();
        if !self
            .store
            .cas_to_preparing(task.id, &device_id, now, now)
            .await?
        {
            // Another scheduler instance (or a concurrent kill) won the race.
            return Ok(false);
        }

        info!(task_id = %task.id, device_id = %device_id, "assigned task to device");
        match self.spawn_worker(task.id) {
            Ok(child) => {
                self.workers.lock().await.insert(task.id, child);
            }
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "failed to spawn worker");
            }
        }
        Ok(true)
    }

    fn spawn_worker(&self, task_id: Uuid) -> std::io::Result<Child> {
        Command::new(&self.worker_binary)
            .arg(task_id.to_string())
            .kill_on_drop(true)
            .spawn()
    }

    /// `find_task_to_kill`: mark stale alive tasks as KILLING, then drive
    /// every KILLING task to its terminal FAILED(KILLED) state, signalling
    /// and joining its worker subprocess first if one was ever spawned.
    pub async fn find_task_to_kill(&self, staleness_timeout_seconds: i64) -> Result<()> {
        let now = Utc::now();
        let alive = self
            .store
            .find_by_statuses(&[TaskStatus::Queueing, TaskStatus::Preparing, TaskStatus::Running])
            .await?;
        for task in alive {
            if task.is_stale(now, staleness_timeout_seconds) {
                let _ = self.store.cas_alive_to_killing(task.id).await?;
            }
        }

        let killing = self.store.find_by_statuses(&[TaskStatus::Killing]).await?;
        for task in killing {
            self.terminate_and_join(task.id).await;
            if self.store.cas_killing_to_killed(task.id).await? {
                warn!(task_id = %task.id, "task killed");
            }
        }
        Ok(())
    }

    async fn terminate_and_join(&self, task_id: Uuid) {
        let child = self.workers.lock().await.remove(&task_id);
        let Some(mut child) = child else {
            // Killed before a worker was ever spawned (e.g. still QUEUEING).
            return;
        };
        if let Some(pid) = child.id() {
            send_sigterm(pid);
        }
        let _ = child.wait().await;
    }

    /// Drop worker handles for processes that already exited on their own
    /// (the normal completion/failure path, not a kill).
    pub async fn reap(&self) {
        let mut workers = self.workers.lock().await;
        let finished: Vec<Uuid> = workers
            .iter_mut()
            .filter_map(|(id, child)| match child.try_wait() {
                Ok(Some(_)) => Some(*id),
                _ => None,
            })
            .collect();
        for id in finished {
            workers.remove(&id);
        }
    }
}

fn send_sigterm(pid: u32) {
    let _ = std::process::Command::new("kill")
        .args(["-15", &pid.to_string()])
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status();
}
