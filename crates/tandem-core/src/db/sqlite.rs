//! SQLite-backed local store

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use std::path::Path;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tokio::sync::Mutex;

use super::migrations;
use super::repository::{LocalStore, RecordPredicate};
use crate::error::{Error, Result};
use crate::models::{
    ConflictStrategy, DeviceId, DeviceSyncMetadata, RecordId, RecordType, SyncConflict,
    SyncRecord, SyncStatus,
};

const RECORD_COLUMNS: &str =
    "record_type, id, local_id, last_modified, version, sync_status, device_id, deleted, fields";

const CONFLICT_COLUMNS: &str = "id, record_type, record_id, local_payload, remote_payload, \
     local_version, remote_version, timestamp, resolved, resolution_used";

/// Persistent [`LocalStore`] on a single `SQLite` connection
pub struct SqliteLocalStore {
    conn: Mutex<Connection>,
}

impl SqliteLocalStore {
    /// Open a database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::init(Connection::open(path)?)
    }

    /// Open an in-memory database (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(mut conn: Connection) -> Result<Self> {
        configure(&conn)?;
        migrations::run(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

/// Configure `SQLite` for a single-writer replica
fn configure(conn: &Connection) -> Result<()> {
    // In-memory databases reject WAL; that is fine
    conn.pragma_update(None, "journal_mode", "WAL").ok();
    conn.pragma_update(None, "synchronous", "NORMAL").ok();
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}

/// Column values of a `records` row before validation
struct RawRecord {
    record_type: String,
    id: String,
    local_id: String,
    last_modified: i64,
    version: i64,
    sync_status: String,
    device_id: String,
    deleted: bool,
    fields: String,
}

impl RawRecord {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            record_type: row.get(0)?,
            id: row.get(1)?,
            local_id: row.get(2)?,
            last_modified: row.get(3)?,
            version: row.get(4)?,
            sync_status: row.get(5)?,
            device_id: row.get(6)?,
            deleted: row.get::<_, i32>(7)? != 0,
            fields: row.get(8)?,
        })
    }

    fn into_record(self) -> Result<SyncRecord> {
        let fields = match serde_json::from_str::<Value>(&self.fields)? {
            Value::Object(map) => map,
            _ => {
                return Err(Error::Database(format!(
                    "record {} has non-object fields",
                    self.id
                )))
            }
        };
        Ok(SyncRecord {
            id: self.id.parse()?,
            local_id: self.local_id,
            record_type: self.record_type.parse()?,
            last_modified: self.last_modified,
            version: u64::try_from(self.version)
                .map_err(|_| Error::Database(format!("negative version for {}", self.id)))?,
            sync_status: self.sync_status.parse()?,
            device_id: DeviceId::from(self.device_id),
            deleted: self.deleted,
            fields,
        })
    }
}

fn collect_records(raw: Vec<RawRecord>) -> Result<Vec<SyncRecord>> {
    raw.into_iter().map(RawRecord::into_record).collect()
}

fn to_sql_version(version: u64) -> Result<i64> {
    i64::try_from(version).map_err(|_| Error::InvalidInput(format!("version {version} too large")))
}

/// `json_extract` path for a content field name
fn field_path(field: &str) -> Result<String> {
    if field.is_empty()
        || !field
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
    {
        return Err(Error::InvalidInput(format!("invalid field name '{field}'")));
    }
    Ok(format!("$.{field}"))
}

struct RawConflict {
    id: String,
    record_type: String,
    record_id: String,
    local_payload: String,
    remote_payload: String,
    local_version: i64,
    remote_version: i64,
    timestamp: i64,
    resolved: bool,
    resolution_used: Option<String>,
}

impl RawConflict {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            record_type: row.get(1)?,
            record_id: row.get(2)?,
            local_payload: row.get(3)?,
            remote_payload: row.get(4)?,
            local_version: row.get(5)?,
            remote_version: row.get(6)?,
            timestamp: row.get(7)?,
            resolved: row.get::<_, i32>(8)? != 0,
            resolution_used: row.get(9)?,
        })
    }

    fn into_conflict(self) -> Result<SyncConflict> {
        let invalid = |what: &str| Error::Database(format!("conflict {} has invalid {what}", self.id));
        Ok(SyncConflict {
            record_type: self.record_type.parse()?,
            record_id: self.record_id.parse()?,
            local_payload: serde_json::from_str(&self.local_payload)?,
            remote_payload: serde_json::from_str(&self.remote_payload)?,
            local_version: u64::try_from(self.local_version).map_err(|_| invalid("local_version"))?,
            remote_version: u64::try_from(self.remote_version)
                .map_err(|_| invalid("remote_version"))?,
            timestamp: self.timestamp,
            resolved: self.resolved,
            resolution_used: self
                .resolution_used
                .as_deref()
                .map(str::parse::<ConflictStrategy>)
                .transpose()?,
            id: self.id,
        })
    }
}

fn collect_conflicts(raw: Vec<RawConflict>) -> Result<Vec<SyncConflict>> {
    raw.into_iter().map(RawConflict::into_conflict).collect()
}

fn u64_column(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}

fn write_record(conn: &Connection, record: &SyncRecord) -> Result<()> {
    let fields = serde_json::to_string(&record.fields)?;
    let version = to_sql_version(record.version)?;
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO records ({RECORD_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ),
        params![
            record.record_type.as_str(),
            record.id.as_str(),
            record.local_id,
            record.last_modified,
            version,
            record.sync_status.as_str(),
            record.device_id.as_str(),
            i32::from(record.deleted),
            fields,
        ],
    )?;
    Ok(())
}

#[async_trait]
impl LocalStore for SqliteLocalStore {
    async fn get(&self, record_type: RecordType, id: &RecordId) -> Result<Option<SyncRecord>> {
        let conn = self.conn.lock().await;
        let raw = conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM records WHERE record_type = ? AND id = ?"),
                params![record_type.as_str(), id.as_str()],
                RawRecord::from_row,
            )
            .optional()?;
        raw.map(RawRecord::into_record).transpose()
    }

    async fn put(&self, record: &SyncRecord) -> Result<()> {
        let conn = self.conn.lock().await;
        write_record(&conn, record)
    }

    async fn put_if_version(&self, record: &SyncRecord, expected: Option<u64>) -> Result<bool> {
        let conn = self.conn.lock().await;
        let stored: Option<i64> = conn
            .query_row(
                "SELECT version FROM records WHERE record_type = ? AND id = ?",
                params![record.record_type.as_str(), record.id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        if stored.map(u64_column) != expected {
            return Ok(false);
        }
        write_record(&conn, record)?;
        Ok(true)
    }

    async fn query_by_status(
        &self,
        record_type: RecordType,
        status: SyncStatus,
    ) -> Result<Vec<SyncRecord>> {
        let raw = {
            let conn = self.conn.lock().await;
            let mut stmt = conn.prepare(&format!(
                "SELECT {RECORD_COLUMNS} FROM records
                 WHERE record_type = ? AND sync_status = ?
                 ORDER BY last_modified ASC, id ASC"
            ))?;
            let rows = stmt
                .query_map(
                    params![record_type.as_str(), status.as_str()],
                    RawRecord::from_row,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        collect_records(raw)
    }

    async fn query_by_field(
        &self,
        record_type: RecordType,
        field: &str,
        value: &Value,
    ) -> Result<Vec<SyncRecord>> {
        let path = field_path(field)?;
        let raw = {
            let conn = self.conn.lock().await;
            let mut stmt = conn.prepare(&format!(
                "SELECT {RECORD_COLUMNS} FROM records
                 WHERE record_type = ? AND json_extract(fields, ?) IS NOT NULL
                 ORDER BY last_modified DESC, id DESC"
            ))?;
            let rows = stmt
                .query_map(params![record_type.as_str(), path], RawRecord::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        // JSON equality is decided on decoded values, not SQL affinity
        Ok(collect_records(raw)?
            .into_iter()
            .filter(|record| record.fields.get(field) == Some(value))
            .collect())
    }

    async fn list(
        &self,
        record_type: RecordType,
        include_deleted: bool,
    ) -> Result<Vec<SyncRecord>> {
        let raw = {
            let conn = self.conn.lock().await;
            let mut stmt = conn.prepare(&format!(
                "SELECT {RECORD_COLUMNS} FROM records
                 WHERE record_type = ? AND (? OR deleted = 0)
                 ORDER BY last_modified DESC, id DESC"
            ))?;
            let rows = stmt
                .query_map(
                    params![record_type.as_str(), include_deleted],
                    RawRecord::from_row,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        collect_records(raw)
    }

    async fn count(&self, record_type: RecordType, predicate: &RecordPredicate) -> Result<u64> {
        let conn = self.conn.lock().await;
        let count: i64 = match predicate {
            RecordPredicate::All => conn.query_row(
                "SELECT COUNT(*) FROM records WHERE record_type = ?",
                params![record_type.as_str()],
                |row| row.get(0),
            )?,
            RecordPredicate::Status(status) => conn.query_row(
                "SELECT COUNT(*) FROM records WHERE record_type = ? AND sync_status = ?",
                params![record_type.as_str(), status.as_str()],
                |row| row.get(0),
            )?,
            RecordPredicate::Dirty => conn.query_row(
                "SELECT COUNT(*) FROM records WHERE record_type = ? AND sync_status IN (?, ?)",
                params![
                    record_type.as_str(),
                    SyncStatus::Pending.as_str(),
                    SyncStatus::Syncing.as_str()
                ],
                |row| row.get(0),
            )?,
            RecordPredicate::Live => conn.query_row(
                "SELECT COUNT(*) FROM records WHERE record_type = ? AND deleted = 0",
                params![record_type.as_str()],
                |row| row.get(0),
            )?,
        };
        Ok(u64_column(count))
    }

    async fn insert_conflict(&self, conflict: &SyncConflict) -> Result<()> {
        let local_payload = serde_json::to_string(&conflict.local_payload)?;
        let remote_payload = serde_json::to_string(&conflict.remote_payload)?;
        let conn = self.conn.lock().await;
        conn.execute(
            &format!(
                "INSERT INTO sync_conflicts ({CONFLICT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ),
            params![
                conflict.id,
                conflict.record_type.as_str(),
                conflict.record_id.as_str(),
                local_payload,
                remote_payload,
                to_sql_version(conflict.local_version)?,
                to_sql_version(conflict.remote_version)?,
                conflict.timestamp,
                i32::from(conflict.resolved),
                conflict.resolution_used.map(ConflictStrategy::as_str),
            ],
        )?;
        Ok(())
    }

    async fn update_conflict(&self, conflict: &SyncConflict) -> Result<()> {
        let conn = self.conn.lock().await;
        let rows = conn.execute(
            "UPDATE sync_conflicts SET resolved = ?, resolution_used = ? WHERE id = ?",
            params![
                i32::from(conflict.resolved),
                conflict.resolution_used.map(ConflictStrategy::as_str),
                conflict.id,
            ],
        )?;
        if rows == 0 {
            return Err(Error::NotFound(format!("conflict {}", conflict.id)));
        }
        Ok(())
    }

    async fn get_conflict(&self, id: &str) -> Result<Option<SyncConflict>> {
        let raw = {
            let conn = self.conn.lock().await;
            conn.query_row(
                &format!("SELECT {CONFLICT_COLUMNS} FROM sync_conflicts WHERE id = ?"),
                params![id],
                RawConflict::from_row,
            )
            .optional()?
        };
        raw.map(RawConflict::into_conflict).transpose()
    }

    async fn unresolved_conflicts(&self) -> Result<Vec<SyncConflict>> {
        let raw = {
            let conn = self.conn.lock().await;
            let mut stmt = conn.prepare(&format!(
                "SELECT {CONFLICT_COLUMNS} FROM sync_conflicts
                 WHERE resolved = 0
                 ORDER BY timestamp ASC, id ASC"
            ))?;
            let rows = stmt
                .query_map([], RawConflict::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        collect_conflicts(raw)
    }

    async fn list_conflicts(
        &self,
        limit: usize,
        include_resolved: bool,
    ) -> Result<Vec<SyncConflict>> {
        let raw = {
            let conn = self.conn.lock().await;
            let mut stmt = conn.prepare(&format!(
                "SELECT {CONFLICT_COLUMNS} FROM sync_conflicts
                 WHERE (? OR resolved = 0)
                 ORDER BY timestamp DESC, id DESC
                 LIMIT ?"
            ))?;
            let rows = stmt
                .query_map(
                    params![include_resolved, limit as i64],
                    RawConflict::from_row,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        collect_conflicts(raw)
    }

    async fn get_metadata(&self, device_id: &DeviceId) -> Result<Option<DeviceSyncMetadata>> {
        let conn = self.conn.lock().await;
        let metadata = conn
            .query_row(
                "SELECT device_id, last_sync_timestamp, sync_version, pending_count, conflict_count
                 FROM sync_metadata WHERE device_id = ?",
                params![device_id.as_str()],
                |row| {
                    Ok(DeviceSyncMetadata {
                        device_id: DeviceId::from(row.get::<_, String>(0)?),
                        last_sync_timestamp: row.get(1)?,
                        sync_version: u64_column(row.get(2)?),
                        pending_count: u64_column(row.get(3)?),
                        conflict_count: u64_column(row.get(4)?),
                    })
                },
            )
            .optional()?;
        Ok(metadata)
    }

    async fn put_metadata(&self, metadata: &DeviceSyncMetadata) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO sync_metadata
                (device_id, last_sync_timestamp, sync_version, pending_count, conflict_count)
             VALUES (?, ?, ?, ?, ?)",
            params![
                metadata.device_id.as_str(),
                metadata.last_sync_timestamp,
                to_sql_version(metadata.sync_version)?,
                to_sql_version(metadata.pending_count)?,
                to_sql_version(metadata.conflict_count)?,
            ],
        )?;
        Ok(())
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().await;
        Ok(conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?",
                params![key],
                |row| row.get(0),
            )
            .optional()?)
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?, ?)",
            params![key, value],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_path_rejects_odd_names() {
        assert_eq!(field_path("conversationId").unwrap(), "$.conversationId");
        assert!(field_path("").is_err());
        assert!(field_path("a.b").is_err());
        assert!(field_path("x') --").is_err());
    }

    #[tokio::test]
    async fn open_on_disk_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("replica.db");

        {
            let store = SqliteLocalStore::open(&path).unwrap();
            store.set_setting("device_id", "dev-a").await.unwrap();
        }

        let store = SqliteLocalStore::open(&path).unwrap();
        assert_eq!(
            store.get_setting("device_id").await.unwrap().as_deref(),
            Some("dev-a")
        );
    }
}
