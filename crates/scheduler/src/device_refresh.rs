use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use device_bridge::DeviceBridge;
use store::DeviceStore;
use task_core::DeviceInventory;

use crate::error::Result;

/// Refreshes the device inventory snapshot served by `/device/list`. Runs
/// on its own slower cadence, separate from the per-task dispatch tick,
/// since querying every attached device's battery/power/hostname is much
/// more expensive than a single store read.
pub async fn refresh_devices(
    bridge: &Arc<dyn DeviceBridge>,
    store: &Arc<dyn DeviceStore>,
) -> Result<()> {
    let device_ids = bridge.list_devices().await;
    let mut device_infos = Vec::with_capacity(device_ids.len());
    for device_id in &device_ids {
        device_infos.push(bridge.get_info(device_id).await);
    }

    let inventory = DeviceInventory {
        device_infos,
        update_time: Utc::now(),
    };
    info!(count = inventory.device_infos.len(), "refreshed device inventory");
    if let Err(e) = store.upsert_inventory(&inventory).await {
        warn!(error = %e, "failed to persist device inventory");
        return Err(e.into());
    }
    Ok(())
}
