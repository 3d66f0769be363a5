//! Syncable record model

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Snapshot keys that belong to the record envelope rather than its content.
pub const RESERVED_FIELDS: [&str; 8] = [
    "id",
    "localId",
    "recordType",
    "lastModified",
    "version",
    "syncStatus",
    "deviceId",
    "deleted",
];

/// A globally stable record identifier.
///
/// New identifiers are UUID v7 (time-sortable) generated by the creating
/// device; identifiers received from peers are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Create a new unique record ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Get the string representation of this ID
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RecordId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.contains(':') {
            return Err(Error::InvalidInput(format!("invalid record id '{s}'")));
        }
        Ok(Self(trimmed.to_string()))
    }
}

/// Stable per-installation device identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Generate a fresh random device identifier
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for DeviceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kinds of synchronized records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RecordType {
    /// A conversation (stored under the `chat` key segment)
    #[serde(rename = "chat")]
    Conversation,
    /// A message belonging to a conversation
    #[serde(rename = "message")]
    Message,
}

impl RecordType {
    /// Every synchronized record type, in reconciliation order
    pub const ALL: [Self; 2] = [Self::Conversation, Self::Message];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Conversation => "chat",
            Self::Message => "message",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chat" | "conversation" => Ok(Self::Conversation),
            "message" => Ok(Self::Message),
            other => Err(Error::InvalidInput(format!("unknown record type '{other}'"))),
        }
    }
}

/// Sync lifecycle of a local record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    Pending,
    Syncing,
    Synced,
    Conflict,
    Error,
}

impl SyncStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Syncing => "SYNCING",
            Self::Synced => "SYNCED",
            Self::Conflict => "CONFLICT",
            Self::Error => "ERROR",
        }
    }

    /// Local changes exist that peers may not have observed yet
    pub const fn is_dirty(self) -> bool {
        matches!(self, Self::Pending | Self::Syncing)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "SYNCING" => Ok(Self::Syncing),
            "SYNCED" => Ok(Self::Synced),
            "CONFLICT" => Ok(Self::Conflict),
            "ERROR" => Ok(Self::Error),
            other => Err(Error::InvalidInput(format!("unknown sync status '{other}'"))),
        }
    }
}

/// Versioned entity shared by every synchronized record type.
///
/// Content lives in `fields`, which is flattened into the snapshot so the
/// wire shape is a single JSON object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRecord {
    pub id: RecordId,
    pub local_id: String,
    pub record_type: RecordType,
    /// Last local mutation (Unix ms)
    pub last_modified: i64,
    pub version: u64,
    pub sync_status: SyncStatus,
    pub device_id: DeviceId,
    /// Tombstone flag; deletions propagate as versioned updates
    #[serde(default)]
    pub deleted: bool,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl SyncRecord {
    /// Build a freshly created record (version 1, `PENDING`).
    pub fn new(
        record_type: RecordType,
        fields: Map<String, Value>,
        device_id: DeviceId,
        now_ms: i64,
    ) -> Self {
        let id = RecordId::new();
        Self {
            local_id: id.to_string(),
            id,
            record_type,
            last_modified: now_ms,
            version: 1,
            sync_status: SyncStatus::Pending,
            device_id,
            deleted: false,
            fields: strip_reserved(fields),
        }
    }

    /// Build a record for typed content.
    pub fn from_content<T: RecordContent>(
        content: &T,
        device_id: DeviceId,
        now_ms: i64,
    ) -> Result<Self> {
        Ok(Self::new(T::RECORD_TYPE, content.to_fields()?, device_id, now_ms))
    }

    /// Broadcast key for this record's snapshot
    pub fn snapshot_key(&self, namespace: &str) -> String {
        snapshot_key(namespace, self.record_type, &self.id)
    }

    pub const fn is_dirty(&self) -> bool {
        self.sync_status.is_dirty()
    }

    /// Hash over content and tombstone only, ignoring sync metadata.
    pub fn content_hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        // serde_json maps are ordered, so this encoding is canonical
        let encoded = serde_json::to_vec(&self.fields).unwrap_or_default();
        hasher.update(&encoded);
        hasher.update(&[u8::from(self.deleted)]);
        hasher.finalize().to_hex().to_string()
    }

    /// Whether content (fields and tombstone) equals another record's
    pub fn same_content(&self, other: &Self) -> bool {
        self.deleted == other.deleted && self.fields == other.fields
    }

    /// Decode the content into a typed view
    pub fn content<T: RecordContent>(&self) -> Result<T> {
        if self.record_type != T::RECORD_TYPE {
            return Err(Error::InvalidInput(format!(
                "record {} is a {}, not a {}",
                self.id,
                self.record_type,
                T::RECORD_TYPE
            )));
        }
        Ok(serde_json::from_value(Value::Object(self.fields.clone()))?)
    }

    /// Read a string field
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }
}

/// Compose the snapshot key `"{ns}:{recordType}:{id}"`.
pub fn snapshot_key(namespace: &str, record_type: RecordType, id: &RecordId) -> String {
    format!("{namespace}:{record_type}:{id}")
}

/// Prefix shared by all snapshot keys of one record type.
pub fn snapshot_prefix(namespace: &str, record_type: RecordType) -> String {
    format!("{namespace}:{record_type}:")
}

/// Drop envelope keys that would shadow record metadata on the wire.
pub fn strip_reserved(mut fields: Map<String, Value>) -> Map<String, Value> {
    for key in RESERVED_FIELDS {
        fields.remove(key);
    }
    fields
}

/// Typed content stored in a [`SyncRecord`].
pub trait RecordContent: Serialize + DeserializeOwned {
    const RECORD_TYPE: RecordType;

    fn to_fields(&self) -> Result<Map<String, Value>> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(strip_reserved(map)),
            other => Err(Error::InvalidInput(format!(
                "record content must serialize to an object, got {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_record_id_unique() {
        assert_ne!(RecordId::new(), RecordId::new());
    }

    #[test]
    fn test_record_id_rejects_separator() {
        assert!("a:b".parse::<RecordId>().is_err());
        assert!("  ".parse::<RecordId>().is_err());
        assert_eq!("r1".parse::<RecordId>().unwrap().as_str(), "r1");
    }

    #[test]
    fn test_new_record_is_pending_v1() {
        let record = SyncRecord::new(
            RecordType::Conversation,
            fields(json!({"title": "Hello"})),
            DeviceId::from("dev-1"),
            1_000,
        );
        assert_eq!(record.version, 1);
        assert_eq!(record.sync_status, SyncStatus::Pending);
        assert_eq!(record.local_id, record.id.to_string());
        assert!(!record.deleted);
    }

    #[test]
    fn test_snapshot_wire_shape_is_flat() {
        let mut record = SyncRecord::new(
            RecordType::Conversation,
            fields(json!({"title": "Hello"})),
            DeviceId::from("dev-1"),
            1_000,
        );
        record.id = "r1".parse().unwrap();
        record.local_id = "r1".to_string();

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "r1",
                "localId": "r1",
                "recordType": "chat",
                "lastModified": 1000,
                "version": 1,
                "syncStatus": "PENDING",
                "deviceId": "dev-1",
                "deleted": false,
                "title": "Hello"
            })
        );

        let decoded: SyncRecord = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(record.snapshot_key("ns"), "ns:chat:r1");
    }

    #[test]
    fn test_reserved_fields_are_stripped() {
        let record = SyncRecord::new(
            RecordType::Message,
            fields(json!({"content": "hi", "version": 99, "syncStatus": "SYNCED"})),
            DeviceId::from("dev-1"),
            1,
        );
        assert_eq!(record.fields.len(), 1);
        assert_eq!(record.field_str("content"), Some("hi"));
    }

    #[test]
    fn test_content_hash_ignores_metadata() {
        let a = SyncRecord::new(
            RecordType::Conversation,
            fields(json!({"title": "Same"})),
            DeviceId::from("dev-1"),
            1,
        );
        let mut b = a.clone();
        b.version = 7;
        b.sync_status = SyncStatus::Synced;
        b.device_id = DeviceId::from("dev-2");
        assert_eq!(a.content_hash(), b.content_hash());

        b.deleted = true;
        assert_ne!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn test_status_parsing_and_dirtiness() {
        assert_eq!("syncing".parse::<SyncStatus>().unwrap(), SyncStatus::Syncing);
        assert!(SyncStatus::Pending.is_dirty());
        assert!(SyncStatus::Syncing.is_dirty());
        assert!(!SyncStatus::Synced.is_dirty());
        assert!(!SyncStatus::Conflict.is_dirty());
        assert!("bogus".parse::<SyncStatus>().is_err());
    }

    #[test]
    fn test_record_type_names() {
        assert_eq!(RecordType::Conversation.as_str(), "chat");
        assert_eq!("conversation".parse::<RecordType>().unwrap(), RecordType::Conversation);
        assert_eq!(snapshot_prefix("ns", RecordType::Message), "ns:message:");
    }
}
