//! Local store contract

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::models::{
    DeviceId, DeviceSyncMetadata, RecordId, RecordType, SyncConflict, SyncRecord, SyncStatus,
};

/// Filter for [`LocalStore::count`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordPredicate {
    All,
    Status(SyncStatus),
    /// `PENDING` or `SYNCING`
    Dirty,
    /// Not tombstoned
    Live,
}

impl RecordPredicate {
    pub fn matches(&self, record: &SyncRecord) -> bool {
        match self {
            Self::All => true,
            Self::Status(status) => record.sync_status == *status,
            Self::Dirty => record.is_dirty(),
            Self::Live => !record.deleted,
        }
    }
}

/// Per-device persistent replica.
///
/// Records are kept in one table per [`RecordType`]. The store also holds
/// the conflict ledger rows, device sync metadata and local settings.
/// Implementations never interpret sync status; they persist what they
/// are given.
#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn get(&self, record_type: RecordType, id: &RecordId) -> Result<Option<SyncRecord>>;

    /// Insert or replace a record
    async fn put(&self, record: &SyncRecord) -> Result<()>;

    /// Write `record` only if the stored version still equals `expected`
    /// (`None` meaning no stored record). Returns whether it was written.
    async fn put_if_version(&self, record: &SyncRecord, expected: Option<u64>) -> Result<bool>;

    async fn query_by_status(
        &self,
        record_type: RecordType,
        status: SyncStatus,
    ) -> Result<Vec<SyncRecord>>;

    /// Records whose content field `field` equals `value`
    async fn query_by_field(
        &self,
        record_type: RecordType,
        field: &str,
        value: &Value,
    ) -> Result<Vec<SyncRecord>>;

    /// All records of a type, most recently modified first
    async fn list(&self, record_type: RecordType, include_deleted: bool)
        -> Result<Vec<SyncRecord>>;

    async fn count(&self, record_type: RecordType, predicate: &RecordPredicate) -> Result<u64>;

    async fn insert_conflict(&self, conflict: &SyncConflict) -> Result<()>;

    async fn update_conflict(&self, conflict: &SyncConflict) -> Result<()>;

    async fn get_conflict(&self, id: &str) -> Result<Option<SyncConflict>>;

    /// Unresolved conflicts, oldest first
    async fn unresolved_conflicts(&self) -> Result<Vec<SyncConflict>>;

    /// Most recent conflicts first
    async fn list_conflicts(&self, limit: usize, include_resolved: bool)
        -> Result<Vec<SyncConflict>>;

    async fn get_metadata(&self, device_id: &DeviceId) -> Result<Option<DeviceSyncMetadata>>;

    async fn put_metadata(&self, metadata: &DeviceSyncMetadata) -> Result<()>;

    async fn get_setting(&self, key: &str) -> Result<Option<String>>;

    async fn set_setting(&self, key: &str, value: &str) -> Result<()>;
}
