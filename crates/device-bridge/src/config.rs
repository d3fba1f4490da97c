use std::time::Duration;

/// Everything the adapter needs that isn't per-call: which `adb` binary to
/// invoke, the fixed on-device directory to push into and pull from, and
/// the pacing of the cancellation poll.
#[derive(Debug, Clone)]
pub struct AdbBridgeConfig {
    pub binary: String,
    pub device_workspace: String,
    pub poll_interval: Duration,
    pub query_timeout: Duration,
}

impl Default for AdbBridgeConfig {
    fn default() -> Self {
        Self {
            binary: "adb".to_string(),
            device_workspace: "/data/local/tmp/muse".to_string(),
            poll_interval: Duration::from_millis(100),
            query_timeout: Duration::from_secs(10),
        }
    }
}
