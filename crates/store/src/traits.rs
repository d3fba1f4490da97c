use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use task_core::{DeviceInventory, Task, TaskStatus};

use crate::error::Result;

/// Durable storage for tasks. Every status-changing method here is a
/// single conditional update keyed by `(id, expected current status)` —
/// the store's whole job is to make that update atomic and report whether
/// it actually applied, never to decide when a transition should happen.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn insert(&self, task: &Task) -> Result<()>;

    async fn find_one(&self, id: Uuid) -> Result<Option<Task>>;

    /// One QUEUEING task with `input_archive_ready = true`, oldest first.
    async fn find_queueing_ready(&self) -> Result<Option<Task>>;

    async fn find_by_statuses(&self, statuses: &[TaskStatus]) -> Result<Vec<Task>>;

    async fn list_non_terminal(&self) -> Result<Vec<Task>>;

    /// Side effect of `/task/query/<id>`: refresh the liveness timestamp.
    /// Returns `false` if the task doesn't exist.
    async fn touch_active_time(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool>;

    async fn set_input_archive_ready(&self, id: Uuid) -> Result<bool>;

    /// QUEUEING -> PREPARING. Fails (returns `false`, no row changed)
    /// unless the task is currently QUEUEING.
    async fn cas_to_preparing(
        &self,
        id: Uuid,
        device_id: &str,
        start_time: DateTime<Utc>,
        active_time: DateTime<Utc>,
    ) -> Result<bool>;

    /// QUEUEING -> FAILED(DEVICE_UNAVAILABLE).
    async fn cas_queueing_to_device_unavailable(
        &self,
        id: Uuid,
        finish_time: DateTime<Utc>,
    ) -> Result<bool>;

    /// PREPARING -> FAILED(PUSH_DATA_FAILED).
    async fn cas_preparing_to_push_failed(&self, id: Uuid) -> Result<bool>;

    /// PREPARING -> RUNNING.
    async fn cas_preparing_to_running(
        &self,
        id: Uuid,
        stdout: &str,
        stderr: &str,
    ) -> Result<bool>;

    /// RUNNING -> COMPLETED.
    async fn cas_running_to_completed(
        &self,
        id: Uuid,
        finish_time: DateTime<Utc>,
    ) -> Result<bool>;

    /// RUNNING -> FAILED(NONZERO_RETURN_CODE).
    async fn cas_running_to_nonzero_failed(
        &self,
        id: Uuid,
        finish_time: DateTime<Utc>,
    ) -> Result<bool>;

    /// RUNNING -> FAILED(PULL_DATA_FAILED). Dominates the command's own
    /// exit code, so it takes no `cmd_rc`.
    async fn cas_running_to_pull_failed(&self, id: Uuid) -> Result<bool>;

    /// Any of {QUEUEING, PREPARING, RUNNING} -> KILLING. Returns `false`
    /// (409 territory for the API) if the task is not currently alive.
    async fn cas_alive_to_killing(&self, id: Uuid) -> Result<bool>;

    /// KILLING -> FAILED(KILLED), after the scheduler has joined the
    /// worker (or found there was none to join).
    async fn cas_killing_to_killed(&self, id: Uuid) -> Result<bool>;
}

/// The device inventory snapshot, refreshed on its own background cadence
/// and served verbatim by `/device/list`.
#[async_trait]
pub trait DeviceStore: Send + Sync {
    async fn upsert_inventory(&self, inventory: &DeviceInventory) -> Result<()>;

    async fn get_inventory(&self) -> Result<DeviceInventory>;
}
