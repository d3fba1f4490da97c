use std::sync::Arc;

use shared_config::WorkspaceConfig;
use store::{DeviceStore, TaskStore};

/// Everything a handler needs, cloned cheaply per request via `Arc`s.
#[derive(Clone)]
pub struct AppState {
    pub task_store: Arc<dyn TaskStore>,
    pub device_store: Arc<dyn DeviceStore>,
    pub config: Arc<WorkspaceConfig>,
}
