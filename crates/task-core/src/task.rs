use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TaskCoreError;
use crate::status::{FailReason, TaskStatus};

/// A durable record of one dispatched job. Every field here is part of the
/// schema persisted by the task store; see `task-core::transition` for how
/// fields move together as status advances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub status: TaskStatus,
    pub fail_reason: Option<FailReason>,

    pub cmd_shell: Vec<String>,
    pub output_files: Vec<String>,
    pub hint_device_id: String,

    pub create_user: String,
    pub create_time: DateTime<Utc>,

    pub input_archive_ready: bool,

    pub device_id: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub finish_time: Option<DateTime<Utc>>,
    pub active_time: DateTime<Utc>,

    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

/// Everything the create endpoint needs to hand the store to mint a new,
/// QUEUEING task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub cmd_shell: Vec<String>,
    pub output_files: Vec<String>,
    pub hint_device_id: String,
    pub create_user: String,
}

impl Task {
    /// Construct a freshly queued task. `input_archive_ready` starts false;
    /// the upload endpoint is the only thing that flips it.
    pub fn new(new_task: NewTask) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            status: TaskStatus::Queueing,
            fail_reason: None,
            cmd_shell: new_task.cmd_shell,
            output_files: new_task.output_files,
            hint_device_id: new_task.hint_device_id,
            create_user: new_task.create_user,
            create_time: now,
            input_archive_ready: false,
            device_id: None,
            start_time: None,
            finish_time: None,
            active_time: now,
            stdout: None,
            stderr: None,
        }
    }

    pub fn is_stale(&self, now: DateTime<Utc>, staleness_timeout_seconds: i64) -> bool {
        (now - self.active_time).num_milliseconds() > staleness_timeout_seconds * 1000
    }
}

/// Checked before a `NewTask` is handed to the store. Mirrors the
/// teacher's pre-enqueue payload validation: catch an obviously-bad
/// request before it ever becomes a durable, queued record.
pub fn validate_new_task(new_task: &NewTask) -> Result<(), TaskCoreError> {
    if new_task.hint_device_id.trim().is_empty() {
        return Err(TaskCoreError::MissingHintDeviceId);
    }
    if new_task.cmd_shell.is_empty() {
        return Err(TaskCoreError::EmptyCmdShell);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> NewTask {
        NewTask {
            cmd_shell: vec!["echo".to_string(), "hi".to_string()],
            output_files: vec![],
            hint_device_id: "D1".to_string(),
            create_user: "alice".to_string(),
        }
    }

    #[test]
    fn new_task_starts_queueing_with_archive_not_ready() {
        let task = Task::new(sample());
        assert_eq!(task.status, TaskStatus::Queueing);
        assert!(!task.input_archive_ready);
        assert!(task.device_id.is_none());
        assert!(task.fail_reason.is_none());
    }

    #[test]
    fn staleness_boundary_is_strictly_greater_than_the_timeout() {
        let task = Task::new(sample());
        let exactly_ten = task.active_time + chrono::Duration::seconds(10);
        let just_over = task.active_time + chrono::Duration::seconds(10) + chrono::Duration::milliseconds(1);
        assert!(!task.is_stale(exactly_ten, 10));
        assert!(task.is_stale(just_over, 10));
    }

    #[test]
    fn validate_new_task_rejects_empty_hint_device_id() {
        let mut new_task = sample();
        new_task.hint_device_id = "  ".to_string();
        assert!(matches!(
            validate_new_task(&new_task),
            Err(TaskCoreError::MissingHintDeviceId)
        ));
    }

    #[test]
    fn validate_new_task_rejects_empty_cmd_shell() {
        let mut new_task = sample();
        new_task.cmd_shell = vec![];
        assert!(matches!(
            validate_new_task(&new_task),
            Err(TaskCoreError::EmptyCmdShell)
        ));
    }

    #[test]
    fn validate_new_task_accepts_a_well_formed_request() {
        assert!(validate_new_task(&sample()).is_ok());
    }
}
