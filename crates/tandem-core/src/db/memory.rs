//! In-memory local store

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use super::repository::{LocalStore, RecordPredicate};
use crate::error::Result;
use crate::models::{
    DeviceId, DeviceSyncMetadata, RecordId, RecordType, SyncConflict, SyncRecord, SyncStatus,
};

#[derive(Debug, Default)]
struct MemoryState {
    records: HashMap<RecordType, BTreeMap<RecordId, SyncRecord>>,
    /// Insertion order is detection order
    conflicts: Vec<SyncConflict>,
    metadata: HashMap<DeviceId, DeviceSyncMetadata>,
    settings: HashMap<String, String>,
}

/// Non-persistent [`LocalStore`], used in tests and ephemeral replicas
#[derive(Debug, Clone, Default)]
pub struct MemoryLocalStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first(mut records: Vec<SyncRecord>) -> Vec<SyncRecord> {
    records.sort_by(|a, b| {
        b.last_modified
            .cmp(&a.last_modified)
            .then_with(|| b.id.cmp(&a.id))
    });
    records
}

#[async_trait]
impl LocalStore for MemoryLocalStore {
    async fn get(&self, record_type: RecordType, id: &RecordId) -> Result<Option<SyncRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .records
            .get(&record_type)
            .and_then(|table| table.get(id))
            .cloned())
    }

    async fn put(&self, record: &SyncRecord) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .records
            .entry(record.record_type)
            .or_default()
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn put_if_version(&self, record: &SyncRecord, expected: Option<u64>) -> Result<bool> {
        let mut state = self.state.lock().await;
        let table = state.records.entry(record.record_type).or_default();
        if table.get(&record.id).map(|stored| stored.version) != expected {
            return Ok(false);
        }
        table.insert(record.id.clone(), record.clone());
        Ok(true)
    }

    async fn query_by_status(
        &self,
        record_type: RecordType,
        status: SyncStatus,
    ) -> Result<Vec<SyncRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .records
            .get(&record_type)
            .map(|table| {
                table
                    .values()
                    .filter(|record| record.sync_status == status)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn query_by_field(
        &self,
        record_type: RecordType,
        field: &str,
        value: &Value,
    ) -> Result<Vec<SyncRecord>> {
        let state = self.state.lock().await;
        let matches = state
            .records
            .get(&record_type)
            .map(|table| {
                table
                    .values()
                    .filter(|record| record.fields.get(field) == Some(value))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(newest_first(matches))
    }

    async fn list(
        &self,
        record_type: RecordType,
        include_deleted: bool,
    ) -> Result<Vec<SyncRecord>> {
        let state = self.state.lock().await;
        let records = state
            .records
            .get(&record_type)
            .map(|table| {
                table
                    .values()
                    .filter(|record| include_deleted || !record.deleted)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(newest_first(records))
    }

    async fn count(&self, record_type: RecordType, predicate: &RecordPredicate) -> Result<u64> {
        let state = self.state.lock().await;
        let count = state.records.get(&record_type).map_or(0, |table| {
            table.values().filter(|record| predicate.matches(record)).count()
        });
        Ok(count as u64)
    }

    async fn insert_conflict(&self, conflict: &SyncConflict) -> Result<()> {
        self.state.lock().await.conflicts.push(conflict.clone());
        Ok(())
    }

    async fn update_conflict(&self, conflict: &SyncConflict) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.conflicts.iter_mut().find(|c| c.id == conflict.id) {
            *existing = conflict.clone();
        }
        Ok(())
    }

    async fn get_conflict(&self, id: &str) -> Result<Option<SyncConflict>> {
        let state = self.state.lock().await;
        Ok(state.conflicts.iter().find(|c| c.id == id).cloned())
    }

    async fn unresolved_conflicts(&self) -> Result<Vec<SyncConflict>> {
        let state = self.state.lock().await;
        Ok(state
            .conflicts
            .iter()
            .filter(|c| !c.resolved)
            .cloned()
            .collect())
    }

    async fn list_conflicts(
        &self,
        limit: usize,
        include_resolved: bool,
    ) -> Result<Vec<SyncConflict>> {
        let state = self.state.lock().await;
        Ok(state
            .conflicts
            .iter()
            .rev()
            .filter(|c| include_resolved || !c.resolved)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get_metadata(&self, device_id: &DeviceId) -> Result<Option<DeviceSyncMetadata>> {
        Ok(self.state.lock().await.metadata.get(device_id).cloned())
    }

    async fn put_metadata(&self, metadata: &DeviceSyncMetadata) -> Result<()> {
        self.state
            .lock()
            .await
            .metadata
            .insert(metadata.device_id.clone(), metadata.clone());
        Ok(())
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        Ok(self.state.lock().await.settings.get(key).cloned())
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.state
            .lock()
            .await
            .settings
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
