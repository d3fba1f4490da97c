//! Adapter over the `adb` CLI. Every call here shells out to a real
//! external binary; cancellation is cooperative — callers pass a
//! `tokio_util::sync::CancellationToken` and the adapter polls it between
//! subprocess waits, terminating the child on the way out.

mod bridge;
mod config;
mod error;
mod process;

pub use bridge::{AdbBridge, DeviceBridge};
pub use config::AdbBridgeConfig;
pub use error::BridgeError;

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn list_devices_returns_empty_when_adb_binary_is_missing() {
        let bridge = AdbBridge::new(AdbBridgeConfig {
            binary: "definitely-not-a-real-adb-binary".to_string(),
            ..Default::default()
        });
        assert_eq!(bridge.list_devices().await, Vec::<String>::new());
    }

    #[tokio::test]
    async fn push_data_reports_spawn_failure_for_a_missing_binary() {
        let bridge = AdbBridge::new(AdbBridgeConfig {
            binary: "definitely-not-a-real-adb-binary".to_string(),
            ..Default::default()
        });
        let cancel = CancellationToken::new();
        let result = bridge
            .push_data("D1", Path::new("/tmp/does-not-matter.tar"), &cancel)
            .await;
        assert!(result.is_err());
    }
}
