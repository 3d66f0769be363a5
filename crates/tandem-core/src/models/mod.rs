//! Data models for Tandem

mod change;
mod conversation;
mod metadata;
mod record;
mod sync_conflict;

pub use change::{ChangeKind, ChangeRecord, Envelope, EnvelopeKind};
pub use conversation::{Conversation, Message, MessageRole};
pub use metadata::DeviceSyncMetadata;
pub use record::{
    snapshot_key, snapshot_prefix, strip_reserved, DeviceId, RecordContent, RecordId, RecordType,
    SyncRecord, SyncStatus, RESERVED_FIELDS,
};
pub use sync_conflict::{ConflictStrategy, SyncConflict};
