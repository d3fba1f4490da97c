use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One device's last-observed status, as produced by the bridge adapter's
/// `get_info`. Any sub-query that failed is simply absent, never an error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceInfo {
    pub device_id: String,
    pub power_on: Option<bool>,
    pub battery: Option<f64>,
    pub hostname: Option<String>,
}

/// The full inventory snapshot refreshed by the scheduler's background
/// loop and served verbatim by `/device/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInventory {
    pub device_infos: Vec<DeviceInfo>,
    pub update_time: DateTime<Utc>,
}

impl DeviceInventory {
    pub fn empty() -> Self {
        Self {
            device_infos: Vec::new(),
            update_time: Utc::now(),
        }
    }
}
