use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use device_bridge::{BridgeError, DeviceBridge};
use scheduler::Dispatcher;
use store::{StoreError, TaskStore};
use task_core::{DeviceInfo, NewTask, Task, TaskStatus};

/// An in-memory `TaskStore` fake, mirroring the teacher's hand-rolled
/// mock devices in `crates/netssh-core/tests/` rather than a generated
/// mock: the dispatcher only needs a handful of methods to actually
/// behave, so a small real implementation is clearer than a mock.
#[derive(Default)]
struct FakeTaskStore {
    tasks: Mutex<HashMap<Uuid, Task>>,
}

impl FakeTaskStore {
    fn with_task(task: Task) -> Self {
        let mut tasks = HashMap::new();
        tasks.insert(task.id, task);
        Self {
            tasks: Mutex::new(tasks),
        }
    }
}

#[async_trait]
impl TaskStore for FakeTaskStore {
    async fn insert(&self, task: &Task) -> Result<(), StoreError> {
        self.tasks.lock().await.insert(task.id, task.clone());
        Ok(())
    }

    async fn find_one(&self, id: Uuid) -> Result<Option<Task>, StoreError> {
        Ok(self.tasks.lock().await.get(&id).cloned())
    }

    async fn find_queueing_ready(&self) -> Result<Option<Task>, StoreError> {
        let tasks = self.tasks.lock().await;
        Ok(tasks
            .values()
            .filter(|t| t.status == TaskStatus::Queueing && t.input_archive_ready)
            .min_by_key(|t| t.create_time)
            .cloned())
    }

    async fn find_by_statuses(&self, statuses: &[TaskStatus]) -> Result<Vec<Task>, StoreError> {
        let tasks = self.tasks.lock().await;
        Ok(tasks
            .values()
            .filter(|t| statuses.contains(&t.status))
            .cloned()
            .collect())
    }

    async fn list_non_terminal(&self) -> Result<Vec<Task>, StoreError> {
        self.find_by_statuses(&[
            TaskStatus::Queueing,
            TaskStatus::Preparing,
            TaskStatus::Running,
            TaskStatus::Killing,
        ])
        .await
    }

    async fn touch_active_time(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut tasks = self.tasks.lock().await;
        match tasks.get_mut(&id) {
            Some(t) => {
                t.active_time = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_input_archive_ready(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tasks = self.tasks.lock().await;
        match tasks.get_mut(&id) {
            Some(t) => {
                t.input_archive_ready = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn cas_to_preparing(
        &self,
        id: Uuid,
        device_id: &str,
        start_time: DateTime<Utc>,
        active_time: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut tasks = self.tasks.lock().await;
        match tasks.get_mut(&id) {
            Some(t) if t.status == TaskStatus::Queueing => {
                t.status = TaskStatus::Preparing;
                t.device_id = Some(device_id.to_string());
                t.start_time = Some(start_time);
                t.active_time = active_time;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn cas_queueing_to_device_unavailable(
        &self,
        id: Uuid,
        finish_time: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut tasks = self.tasks.lock().await;
        match tasks.get_mut(&id) {
            Some(t) if t.status == TaskStatus::Queueing => {
                t.status = TaskStatus::Failed;
                t.fail_reason = Some(task_core::FailReason::DeviceUnavailable);
                t.finish_time = Some(finish_time);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn cas_preparing_to_push_failed(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tasks = self.tasks.lock().await;
        match tasks.get_mut(&id) {
            Some(t) if t.status == TaskStatus::Preparing => {
                t.status = TaskStatus::Failed;
                t.fail_reason = Some(task_core::FailReason::PushDataFailed);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn cas_preparing_to_running(
        &self,
        id: Uuid,
        stdout: &str,
        stderr: &str,
    ) -> Result<bool, StoreError> {
        let mut tasks = self.tasks.lock().await;
        match tasks.get_mut(&id) {
            Some(t) if t.status == TaskStatus::Preparing => {
                t.status = TaskStatus::Running;
                t.stdout = Some(stdout.to_string());
                t.stderr = Some(stderr.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn cas_running_to_completed(
        &self,
        id: Uuid,
        finish_time: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut tasks = self.tasks.lock().await;
        match tasks.get_mut(&id) {
            Some(t) if t.status == TaskStatus::Running => {
                t.status = TaskStatus::Completed;
                t.finish_time = Some(finish_time);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn cas_running_to_nonzero_failed(
        &self,
        id: Uuid,
        finish_time: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut tasks = self.tasks.lock().await;
        match tasks.get_mut(&id) {
            Some(t) if t.status == TaskStatus::Running => {
                t.status = TaskStatus::Failed;
                t.fail_reason = Some(task_core::FailReason::NonzeroReturnCode);
                t.finish_time = Some(finish_time);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn cas_running_to_pull_failed(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tasks = self.tasks.lock().await;
        match tasks.get_mut(&id) {
            Some(t) if t.status == TaskStatus::Running => {
                t.status = TaskStatus::Failed;
                t.fail_reason = Some(task_core::FailReason::PullDataFailed);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn cas_alive_to_killing(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tasks = self.tasks.lock().await;
        match tasks.get_mut(&id) {
            Some(t) if t.status.is_alive() => {
                t.status = TaskStatus::Killing;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn cas_killing_to_killed(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tasks = self.tasks.lock().await;
        match tasks.get_mut(&id) {
            Some(t) if t.status == TaskStatus::Killing => {
                t.status = TaskStatus::Failed;
                t.fail_reason = Some(task_core::FailReason::Killed);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

struct FakeDeviceBridge {
    devices: Vec<String>,
}

#[async_trait]
impl DeviceBridge for FakeDeviceBridge {
    async fn list_devices(&self) -> Vec<String> {
        self.devices.clone()
    }

    async fn get_info(&self, device_id: &str) -> DeviceInfo {
        DeviceInfo {
            device_id: device_id.to_string(),
            power_on: Some(true),
            battery: Some(100.0),
            hostname: None,
        }
    }

    async fn push_data(&self, _: &str, _: &Path, _: &CancellationToken) -> Result<(), BridgeError> {
        Ok(())
    }

    async fn pull_data(
        &self,
        _: &str,
        _: &[String],
        _: &Path,
        _: &CancellationToken,
    ) -> Result<(), BridgeError> {
        Ok(())
    }

    async fn run(&self, _: &str, _: &Path, _: &Path, _: &[String], _: &CancellationToken) -> Result<i32, BridgeError> {
        Ok(0)
    }
}

fn queueing_task(hint_device_id: &str) -> Task {
    let mut task = Task::new(NewTask {
        cmd_shell: vec!["echo".to_string()],
        output_files: vec![],
        hint_device_id: hint_device_id.to_string(),
        create_user: "alice".to_string(),
    });
    task.input_archive_ready = true;
    task
}

#[tokio::test]
async fn find_task_to_run_binds_the_hinted_device_when_free() {
    let task = queueing_task("D1");
    let task_id = task.id;
    let store: Arc<dyn TaskStore> = Arc::new(FakeTaskStore::with_task(task));
    let bridge: Arc<dyn DeviceBridge> = Arc::new(FakeDeviceBridge {
        devices: vec!["D1".to_string()],
    });
    let dispatcher = Dispatcher::new(store.clone(), bridge, "/bin/true".to_string());

    assert!(dispatcher.find_task_to_run().await.unwrap());

    let task = store.find_one(task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Preparing);
    assert_eq!(task.device_id.as_deref(), Some("D1"));
}

#[tokio::test]
async fn find_task_to_run_fails_the_task_when_the_hinted_device_is_absent() {
    let task = queueing_task("D-missing");
    let task_id = task.id;
    let store: Arc<dyn TaskStore> = Arc::new(FakeTaskStore::with_task(task));
    let bridge: Arc<dyn DeviceBridge> = Arc::new(FakeDeviceBridge {
        devices: vec!["D1".to_string()],
    });
    let dispatcher = Dispatcher::new(store.clone(), bridge, "/bin/true".to_string());

    assert!(!dispatcher.find_task_to_run().await.unwrap());

    let task = store.find_one(task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.fail_reason, Some(task_core::FailReason::DeviceUnavailable));
}

#[tokio::test]
async fn find_task_to_kill_resolves_a_stale_task_with_no_worker_immediately() {
    let mut task = queueing_task("D1");
    task.active_time = Utc::now() - chrono::Duration::seconds(60);
    let task_id = task.id;
    let store: Arc<dyn TaskStore> = Arc::new(FakeTaskStore::with_task(task));
    let bridge: Arc<dyn DeviceBridge> = Arc::new(FakeDeviceBridge { devices: vec![] });
    let dispatcher = Dispatcher::new(store.clone(), bridge, "/bin/true".to_string());

    dispatcher.find_task_to_kill(10).await.unwrap();

    let task = store.find_one(task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.fail_reason, Some(task_core::FailReason::Killed));
}
