//! Change records and the broadcast envelope

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::record::{DeviceId, RecordId, RecordType, SyncRecord};
use crate::error::Result;

/// Why a snapshot changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

impl ChangeKind {
    /// Classify the mutation that produced `record`'s current version
    pub const fn of(record: &SyncRecord) -> Self {
        if record.deleted {
            Self::Delete
        } else if record.version <= 1 {
            Self::Create
        } else {
            Self::Update
        }
    }
}

/// Unit pushed to the shared change list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    pub id: String,
    pub record_type: RecordType,
    pub record_id: RecordId,
    pub change_kind: ChangeKind,
    /// Full record snapshot at `version`
    pub payload: SyncRecord,
    pub timestamp: i64,
    pub device_id: DeviceId,
    pub version: u64,
    /// Set by the receiver once fed through the pull machinery
    #[serde(default)]
    pub applied: bool,
}

impl ChangeRecord {
    pub fn from_record(record: &SyncRecord, device_id: &DeviceId, now_ms: i64) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            record_type: record.record_type,
            record_id: record.id.clone(),
            change_kind: ChangeKind::of(record),
            payload: record.clone(),
            timestamp: now_ms,
            device_id: device_id.clone(),
            version: record.version,
            applied: false,
        }
    }
}

/// Envelope discriminator (`type` on the wire)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    Change,
    SyncRequest,
    ConflictResolution,
}

/// Wire shape of every entry on the `{ns}:messages` list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    pub device_id: DeviceId,
    pub timestamp: i64,
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    pub fn change(change: &ChangeRecord) -> Result<Self> {
        Self::wrap(EnvelopeKind::Change, change)
    }

    pub fn conflict_resolution(change: &ChangeRecord) -> Result<Self> {
        Self::wrap(EnvelopeKind::ConflictResolution, change)
    }

    pub const fn sync_request(device_id: DeviceId, now_ms: i64) -> Self {
        Self {
            kind: EnvelopeKind::SyncRequest,
            device_id,
            timestamp: now_ms,
            payload: Value::Null,
        }
    }

    fn wrap(kind: EnvelopeKind, change: &ChangeRecord) -> Result<Self> {
        Ok(Self {
            kind,
            device_id: change.device_id.clone(),
            timestamp: change.timestamp,
            payload: serde_json::to_value(change)?,
        })
    }

    /// Decode the carried change record; `None` for envelopes without one
    pub fn change_record(&self) -> Option<Result<ChangeRecord>> {
        match self.kind {
            EnvelopeKind::Change | EnvelopeKind::ConflictResolution => Some(
                serde_json::from_value(self.payload.clone()).map_err(Into::into),
            ),
            EnvelopeKind::SyncRequest => None,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Conversation, RecordContent};
    use serde_json::json;

    fn record() -> SyncRecord {
        let fields = Conversation::new("Hi").to_fields().unwrap();
        SyncRecord::new(RecordType::Conversation, fields, DeviceId::from("d1"), 10)
    }

    #[test]
    fn test_change_kind_classification() {
        let mut r = record();
        assert_eq!(ChangeKind::of(&r), ChangeKind::Create);
        r.version = 2;
        assert_eq!(ChangeKind::of(&r), ChangeKind::Update);
        r.deleted = true;
        assert_eq!(ChangeKind::of(&r), ChangeKind::Delete);
    }

    #[test]
    fn test_envelope_wire_shape() {
        let r = record();
        let change = ChangeRecord::from_record(&r, &DeviceId::from("d1"), 42);
        let envelope = Envelope::change(&change).unwrap();
        let value = serde_json::to_value(&envelope).unwrap();

        assert_eq!(value["type"], json!("change"));
        assert_eq!(value["deviceId"], json!("d1"));
        assert_eq!(value["timestamp"], json!(42));
        assert_eq!(value["payload"]["changeKind"], json!("CREATE"));
        assert_eq!(value["payload"]["applied"], json!(false));

        let decoded = Envelope::from_json(&envelope.to_json().unwrap()).unwrap();
        assert_eq!(decoded.change_record().unwrap().unwrap(), change);
    }

    #[test]
    fn test_sync_request_carries_no_change() {
        let envelope = Envelope::sync_request(DeviceId::from("d2"), 1);
        assert!(envelope.change_record().is_none());
        let raw = envelope.to_json().unwrap();
        assert!(raw.contains("\"type\":\"sync_request\""));
    }

    #[test]
    fn test_malformed_payload_is_an_error() {
        let raw = r#"{"type":"change","deviceId":"d","timestamp":1,"payload":{"nope":true}}"#;
        let envelope = Envelope::from_json(raw).unwrap();
        assert!(envelope.change_record().unwrap().is_err());
    }
}
