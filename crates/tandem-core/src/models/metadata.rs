//! Per-device sync metadata

use serde::{Deserialize, Serialize};

use super::record::DeviceId;

/// One row per device, rewritten at the end of every reconciliation cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSyncMetadata {
    pub device_id: DeviceId,
    /// Completion of the last cycle (Unix ms), zero before the first one
    pub last_sync_timestamp: i64,
    /// Running count of completed cycles
    pub sync_version: u64,
    pub pending_count: u64,
    pub conflict_count: u64,
}

impl DeviceSyncMetadata {
    pub const fn new(device_id: DeviceId) -> Self {
        Self {
            device_id,
            last_sync_timestamp: 0,
            sync_version: 0,
            pending_count: 0,
            conflict_count: 0,
        }
    }

    pub const fn has_synced(&self) -> bool {
        self.sync_version > 0
    }
}
