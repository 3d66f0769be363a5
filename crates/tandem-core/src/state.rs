//! Shared sync state reported to interfaces.

use serde::Serialize;

use crate::sync::CycleStats;

/// Coarse sync state published by the scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Online, no cycle has finished yet
    Idle,
    Offline,
    Syncing,
    Synced,
    Error,
}

impl SyncState {
    /// State after a finished cycle
    pub const fn after(stats: &CycleStats) -> Self {
        if stats.failed == 0 {
            Self::Synced
        } else {
            Self::Error
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Offline => "offline",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Error => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_after_cycle() {
        let mut stats = CycleStats::default();
        assert_eq!(SyncState::after(&stats), SyncState::Synced);
        stats.failed = 2;
        assert_eq!(SyncState::after(&stats), SyncState::Error);
        assert_eq!(SyncState::Error.label(), "error");
    }
}
