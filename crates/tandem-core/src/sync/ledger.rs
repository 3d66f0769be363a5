//! Conflict ledger
//!
//! Conflicts are append-only: a row is written once when detected and later
//! only flipped to resolved. Resolution is never retracted.

use std::sync::Arc;

use crate::db::LocalStore;
use crate::error::{Error, Result};
use crate::models::{ConflictStrategy, RecordId, RecordType, SyncConflict, SyncRecord};

#[derive(Clone)]
pub struct ConflictLedger {
    store: Arc<dyn LocalStore>,
}

impl ConflictLedger {
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self { store }
    }

    /// Append a conflict unless one is already open for this remote version.
    ///
    /// Returns the new conflict, or `None` when it was already recorded.
    pub async fn record(
        &self,
        local: &SyncRecord,
        remote: &SyncRecord,
        now_ms: i64,
    ) -> Result<Option<SyncConflict>> {
        let already_open = self
            .unresolved_for(local.record_type, &local.id)
            .await?
            .iter()
            .any(|conflict| conflict.remote_version == remote.version);
        if already_open {
            return Ok(None);
        }

        let conflict = SyncConflict::new(local, remote, now_ms);
        self.store.insert_conflict(&conflict).await?;
        tracing::info!(
            record_type = %conflict.record_type,
            record_id = %conflict.record_id,
            local_version = conflict.local_version,
            remote_version = conflict.remote_version,
            "Conflict recorded"
        );
        Ok(Some(conflict))
    }

    /// Open conflicts, oldest first
    pub async fn unresolved(&self) -> Result<Vec<SyncConflict>> {
        self.store.unresolved_conflicts().await
    }

    pub async fn unresolved_for(
        &self,
        record_type: RecordType,
        record_id: &RecordId,
    ) -> Result<Vec<SyncConflict>> {
        Ok(self
            .unresolved()
            .await?
            .into_iter()
            .filter(|conflict| {
                conflict.record_type == record_type && &conflict.record_id == record_id
            })
            .collect())
    }

    pub async fn unresolved_count(&self) -> Result<u64> {
        Ok(self.unresolved().await?.len() as u64)
    }

    pub async fn get(&self, id: &str) -> Result<SyncConflict> {
        self.store
            .get_conflict(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("conflict {id}")))
    }

    /// Most recent first
    pub async fn recent(&self, limit: usize, include_resolved: bool) -> Result<Vec<SyncConflict>> {
        self.store.list_conflicts(limit, include_resolved).await
    }

    /// Flip a conflict to resolved, recording the strategy used
    pub async fn mark_resolved(
        &self,
        conflict: &SyncConflict,
        strategy: ConflictStrategy,
    ) -> Result<SyncConflict> {
        if conflict.resolved {
            return Err(Error::InvalidInput(format!(
                "conflict {} is already resolved",
                conflict.id
            )));
        }
        if strategy == ConflictStrategy::Manual {
            return Err(Error::InvalidInput(
                "manual is not a resolution; pick local_wins, remote_wins or merge".into(),
            ));
        }

        let mut resolved = conflict.clone();
        resolved.resolved = true;
        resolved.resolution_used = Some(strategy);
        self.store.update_conflict(&resolved).await?;
        Ok(resolved)
    }
}
