use serde::{Deserialize, Serialize};

/// The six states a task may occupy. Values are persisted by name, not by
/// discriminant, so adding variants never breaks data already written to
/// the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Queueing,
    Preparing,
    Running,
    Killing,
    Completed,
    Failed,
}

impl TaskStatus {
    /// COMPLETED and FAILED are terminal: no transition originates there.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// The statuses eligible for the staleness sweep and for binding a
    /// device exclusively.
    pub fn is_alive(self) -> bool {
        matches!(
            self,
            TaskStatus::Queueing | TaskStatus::Preparing | TaskStatus::Running
        )
    }

    /// Statuses that hold exclusive ownership of a device.
    pub fn holds_device(self) -> bool {
        matches!(
            self,
            TaskStatus::Preparing | TaskStatus::Running | TaskStatus::Killing
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Queueing => "QUEUEING",
            TaskStatus::Preparing => "PREPARING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Killing => "KILLING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUEING" => Ok(TaskStatus::Queueing),
            "PREPARING" => Ok(TaskStatus::Preparing),
            "RUNNING" => Ok(TaskStatus::Running),
            "KILLING" => Ok(TaskStatus::Killing),
            "COMPLETED" => Ok(TaskStatus::Completed),
            "FAILED" => Ok(TaskStatus::Failed),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// Present iff `status == FAILED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailReason {
    DeviceUnavailable,
    PushDataFailed,
    PullDataFailed,
    NonzeroReturnCode,
    Killed,
}

impl FailReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FailReason::DeviceUnavailable => "DEVICE_UNAVAILABLE",
            FailReason::PushDataFailed => "PUSH_DATA_FAILED",
            FailReason::PullDataFailed => "PULL_DATA_FAILED",
            FailReason::NonzeroReturnCode => "NONZERO_RETURN_CODE",
            FailReason::Killed => "KILLED",
        }
    }
}

impl std::fmt::Display for FailReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FailReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEVICE_UNAVAILABLE" => Ok(FailReason::DeviceUnavailable),
            "PUSH_DATA_FAILED" => Ok(FailReason::PushDataFailed),
            "PULL_DATA_FAILED" => Ok(FailReason::PullDataFailed),
            "NONZERO_RETURN_CODE" => Ok(FailReason::NonzeroReturnCode),
            "KILLED" => Ok(FailReason::Killed),
            other => Err(format!("unknown fail reason: {other}")),
        }
    }
}
