//! tandem-core - Core library for Tandem
//!
//! Local-first synchronization of conversations and messages across
//! devices. Every device keeps a full replica in a [`db::LocalStore`] and
//! converges with its peers through a shared key-value
//! [`broadcast::BroadcastStore`] using versioned snapshots.

pub mod broadcast;
pub mod config;
pub mod db;
pub mod device;
pub mod error;
pub mod models;
pub mod replica;
pub mod state;
pub mod sync;
pub mod util;

pub use config::{ScheduleConfig, SyncConfig};
pub use device::load_or_create_device_id;
pub use error::{Error, Result};
pub use models::{
    ConflictStrategy, Conversation, DeviceId, Message, MessageRole, RecordId, RecordType,
    SyncConflict, SyncRecord, SyncStatus,
};
pub use replica::Replica;
pub use state::SyncState;
pub use sync::{CycleReport, CycleStats, Reconciler, Scheduler, SchedulerHandle, Trigger};
