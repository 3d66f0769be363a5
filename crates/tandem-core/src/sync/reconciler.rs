//! Reconciliation engine
//!
//! One cycle runs four phases in order: push dirty records, pull remote
//! snapshots, resolve open conflicts and refresh device metadata. At most
//! one cycle runs at a time per [`Reconciler`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};

use super::ledger::ConflictLedger;
use super::strategy::resolve;
use crate::broadcast::BroadcastStore;
use crate::config::SyncConfig;
use crate::db::{LocalStore, RecordPredicate};
use crate::error::{Error, Result};
use crate::models::{
    snapshot_prefix, ChangeRecord, ConflictStrategy, DeviceId, DeviceSyncMetadata, Envelope,
    EnvelopeKind, RecordId, RecordType, SyncConflict, SyncRecord, SyncStatus,
};
use crate::util::unix_millis_now;

/// Counters reported by one reconciliation cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleStats {
    /// Another cycle was in flight; nothing ran
    pub skipped: bool,
    pub pushed: usize,
    /// Remote snapshots examined during pull
    pub pulled: usize,
    pub adopted: usize,
    pub confirmed: usize,
    pub repushed: usize,
    pub conflicts_detected: usize,
    pub conflicts_resolved: usize,
    pub failed: usize,
    pub started_at: i64,
    pub finished_at: i64,
}

impl CycleStats {
    fn started(now_ms: i64) -> Self {
        Self {
            started_at: now_ms,
            ..Self::default()
        }
    }

    fn skipped(now_ms: i64) -> Self {
        Self {
            skipped: true,
            started_at: now_ms,
            finished_at: now_ms,
            ..Self::default()
        }
    }

    /// Whether every step of the cycle succeeded
    pub const fn is_clean(&self) -> bool {
        !self.skipped && self.failed == 0
    }

    /// Whether the cycle moved any data in either direction
    pub const fn changed_anything(&self) -> bool {
        self.pushed
            + self.adopted
            + self.confirmed
            + self.repushed
            + self.conflicts_detected
            + self.conflicts_resolved
            > 0
    }

    fn tally(&mut self, outcome: PullOutcome) {
        match outcome {
            PullOutcome::Adopted => self.adopted += 1,
            PullOutcome::Confirmed => self.confirmed += 1,
            PullOutcome::Repushed => self.repushed += 1,
            PullOutcome::ConflictRaised => self.conflicts_detected += 1,
            PullOutcome::Unchanged => {}
        }
    }
}

/// What applying one remote snapshot did locally
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    /// Remote copy stored as `SYNCED`
    Adopted,
    /// Our own in-flight push observed remotely
    Confirmed,
    /// Remote was behind; the local copy was published again
    Repushed,
    ConflictRaised,
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PushOutcome {
    Published,
    /// Remote already holds exactly this version
    AlreadyPublished,
    /// Remote is newer; left for pull to compare
    Deferred,
    /// An open conflict blocks publication
    Held,
    ConflictRaised,
    Failed,
}

pub struct Reconciler {
    local: Arc<dyn LocalStore>,
    remote: Arc<dyn BroadcastStore>,
    ledger: ConflictLedger,
    config: SyncConfig,
    device_id: DeviceId,
    in_flight: Mutex<()>,
}

impl Reconciler {
    pub fn new(
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn BroadcastStore>,
        config: SyncConfig,
        device_id: DeviceId,
    ) -> Self {
        Self {
            ledger: ConflictLedger::new(Arc::clone(&local)),
            local,
            remote,
            config,
            device_id,
            in_flight: Mutex::new(()),
        }
    }

    pub const fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub const fn ledger(&self) -> &ConflictLedger {
        &self.ledger
    }

    pub(crate) fn remote(&self) -> &dyn BroadcastStore {
        self.remote.as_ref()
    }

    /// Claim the in-flight slot without waiting
    pub(crate) fn try_begin(&self) -> Option<MutexGuard<'_, ()>> {
        self.in_flight.try_lock().ok()
    }

    /// Run one full cycle.
    ///
    /// Failures are counted in the returned stats rather than aborting the
    /// cycle; affected records stay dirty and are retried next time. A call
    /// made while another cycle is running returns immediately with
    /// `skipped` set.
    pub async fn run_cycle(&self) -> CycleStats {
        let Some(_guard) = self.try_begin() else {
            tracing::debug!("Reconciliation already in flight, skipping");
            return CycleStats::skipped(unix_millis_now());
        };

        let mut stats = CycleStats::started(unix_millis_now());
        self.push_phase(&mut stats).await;
        self.pull_phase(&mut stats).await;
        self.resolve_phase(&mut stats).await;
        if stats.pushed + stats.repushed + stats.conflicts_resolved > 0 {
            if let Err(error) = self.trim_messages().await {
                tracing::warn!("Failed to trim change list: {}", error);
                stats.failed += 1;
            }
        }
        stats.finished_at = unix_millis_now();
        if let Err(error) = self.record_metadata(stats.finished_at).await {
            tracing::warn!("Failed to update sync metadata: {}", error);
            stats.failed += 1;
        }

        tracing::info!(
            pushed = stats.pushed,
            pulled = stats.pulled,
            adopted = stats.adopted,
            confirmed = stats.confirmed,
            repushed = stats.repushed,
            conflicts_detected = stats.conflicts_detected,
            conflicts_resolved = stats.conflicts_resolved,
            failed = stats.failed,
            elapsed_ms = stats.finished_at - stats.started_at,
            "Reconciliation cycle finished"
        );
        stats
    }

    async fn push_phase(&self, stats: &mut CycleStats) {
        let mut pending = Vec::new();
        for record_type in RecordType::ALL {
            match self
                .local
                .query_by_status(record_type, SyncStatus::Pending)
                .await
            {
                Ok(records) => pending.extend(records),
                Err(error) => {
                    tracing::warn!("Failed to load pending {} records: {}", record_type, error);
                    stats.failed += 1;
                }
            }
        }
        if pending.is_empty() {
            return;
        }

        let held: HashSet<(RecordType, RecordId)> = match self.ledger.unresolved().await {
            Ok(conflicts) => conflicts
                .into_iter()
                .map(|conflict| (conflict.record_type, conflict.record_id))
                .collect(),
            Err(error) => {
                tracing::warn!("Failed to load open conflicts: {}", error);
                stats.failed += 1;
                return;
            }
        };

        let held = &held;
        let outcomes: Vec<PushOutcome> = stream::iter(pending)
            .map(|record| async move {
                let key = (record.record_type, record.id.clone());
                self.push_record(record, held.contains(&key)).await
            })
            .buffer_unordered(self.config.push_concurrency.max(1))
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                PushOutcome::Published => stats.pushed += 1,
                PushOutcome::ConflictRaised => stats.conflicts_detected += 1,
                PushOutcome::Failed => stats.failed += 1,
                PushOutcome::AlreadyPublished | PushOutcome::Deferred | PushOutcome::Held => {}
            }
        }
    }

    async fn push_record(&self, mut record: SyncRecord, held: bool) -> PushOutcome {
        if held {
            return match self.set_status(&mut record, SyncStatus::Conflict).await {
                Ok(_) => PushOutcome::Held,
                Err(error) => {
                    tracing::warn!("Failed to flag {} as conflicted: {}", record.id, error);
                    PushOutcome::Failed
                }
            };
        }

        let existing = match self.fetch_remote(record.record_type, &record.id).await {
            Ok(existing) => existing,
            Err(error) => {
                tracing::warn!(record_id = %record.id, "Push failed: {}", error);
                return PushOutcome::Failed;
            }
        };

        let outcome = match existing {
            Some(remote) if remote.version > record.version => PushOutcome::Deferred,
            Some(remote)
                if remote.version == record.version
                    && remote.device_id == record.device_id
                    && remote.same_content(&record) =>
            {
                PushOutcome::AlreadyPublished
            }
            Some(remote)
                if self.config.strict_content_check
                    && remote.version == record.version
                    && remote.device_id != self.device_id
                    && !remote.same_content(&record) =>
            {
                return self.raise_conflict(record, &remote).await;
            }
            _ => match self.publish(&record, EnvelopeKind::Change).await {
                Ok(()) => PushOutcome::Published,
                Err(error) => {
                    tracing::warn!(record_id = %record.id, "Push failed: {}", error);
                    return PushOutcome::Failed;
                }
            },
        };

        if let Err(error) = self.set_status(&mut record, SyncStatus::Syncing).await {
            tracing::warn!("Failed to mark {} as syncing: {}", record.id, error);
            return PushOutcome::Failed;
        }
        tracing::debug!(record_id = %record.id, version = record.version, ?outcome, "Pushed");
        outcome
    }

    async fn raise_conflict(&self, mut local: SyncRecord, remote: &SyncRecord) -> PushOutcome {
        match self.flag_conflict(&mut local, remote).await {
            Ok(true) => PushOutcome::ConflictRaised,
            Ok(false) => PushOutcome::Held,
            Err(error) => {
                tracing::warn!("Failed to record conflict for {}: {}", local.id, error);
                PushOutcome::Failed
            }
        }
    }

    /// Record a conflict and mark the local copy. Returns whether a new
    /// conflict was appended.
    async fn flag_conflict(&self, local: &mut SyncRecord, remote: &SyncRecord) -> Result<bool> {
        let created = self
            .ledger
            .record(local, remote, unix_millis_now())
            .await?
            .is_some();
        if local.sync_status != SyncStatus::Conflict {
            self.set_status(local, SyncStatus::Conflict).await?;
        }
        Ok(created)
    }

    /// Store a new status for `record` unless a local edit has moved the
    /// stored copy past its version. Returns whether it was stored.
    async fn set_status(&self, record: &mut SyncRecord, status: SyncStatus) -> Result<bool> {
        record.sync_status = status;
        let written = self
            .local
            .put_if_version(record, Some(record.version))
            .await?;
        if !written {
            tracing::debug!(
                record_id = %record.id,
                version = record.version,
                "Local copy changed during sync, keeping it"
            );
        }
        Ok(written)
    }

    async fn pull_phase(&self, stats: &mut CycleStats) {
        for record_type in RecordType::ALL {
            let prefix = snapshot_prefix(&self.config.namespace, record_type);
            let keys = match self.remote.keys(&prefix).await {
                Ok(keys) => keys,
                Err(error) => {
                    tracing::warn!("Failed to list {} snapshots: {}", record_type, error);
                    stats.failed += 1;
                    continue;
                }
            };

            let fetched: Vec<(String, Result<Option<SyncRecord>>)> = stream::iter(keys)
                .map(|key| async move {
                    let snapshot = self.fetch_key(&key).await;
                    (key, snapshot)
                })
                .buffer_unordered(self.config.push_concurrency.max(1))
                .collect()
                .await;

            for (key, snapshot) in fetched {
                let remote = match snapshot {
                    Ok(Some(remote)) => remote,
                    Ok(None) => continue,
                    Err(error) => {
                        tracing::warn!(key = %key, "Skipping unreadable snapshot: {}", error);
                        stats.failed += 1;
                        continue;
                    }
                };
                stats.pulled += 1;
                match self.apply_remote(remote).await {
                    Ok(outcome) => stats.tally(outcome),
                    Err(error) => {
                        tracing::warn!(key = %key, "Failed to apply snapshot: {}", error);
                        stats.failed += 1;
                    }
                }
            }
        }
    }

    /// Compare one remote snapshot against the local copy and act on it.
    ///
    /// Versions only ever move forward locally: a remote copy is adopted
    /// only when strictly newer and the local copy has nothing unsent.
    pub(crate) async fn apply_remote(&self, remote: SyncRecord) -> Result<PullOutcome> {
        let Some(mut local) = self.local.get(remote.record_type, &remote.id).await? else {
            return self.adopt(remote, None).await;
        };

        match remote.version.cmp(&local.version) {
            std::cmp::Ordering::Greater => {
                if local.is_dirty() || local.sync_status == SyncStatus::Conflict {
                    let created = self.flag_conflict(&mut local, &remote).await?;
                    return Ok(if created {
                        PullOutcome::ConflictRaised
                    } else {
                        PullOutcome::Unchanged
                    });
                }
                let expected = local.version;
                self.adopt(remote, Some(expected)).await
            }
            std::cmp::Ordering::Less => {
                if local.sync_status == SyncStatus::Conflict {
                    return Ok(PullOutcome::Unchanged);
                }
                self.publish(&local, EnvelopeKind::Change).await?;
                // Only a later pull that sees this version confirms it
                if local.sync_status == SyncStatus::Pending {
                    self.set_status(&mut local, SyncStatus::Syncing).await?;
                }
                Ok(PullOutcome::Repushed)
            }
            std::cmp::Ordering::Equal => {
                if self.config.strict_content_check
                    && local.is_dirty()
                    && remote.device_id != self.device_id
                    && !local.same_content(&remote)
                {
                    let created = self.flag_conflict(&mut local, &remote).await?;
                    return Ok(if created {
                        PullOutcome::ConflictRaised
                    } else {
                        PullOutcome::Unchanged
                    });
                }
                if local.sync_status == SyncStatus::Syncing
                    && self.set_status(&mut local, SyncStatus::Synced).await?
                {
                    return Ok(PullOutcome::Confirmed);
                }
                Ok(PullOutcome::Unchanged)
            }
        }
    }

    /// Apply a payload read from the change list.
    ///
    /// Entries on the list can be far older than the current snapshot, so a
    /// payload at or below the local version is ignored and left to pull.
    pub(crate) async fn apply_change(&self, payload: SyncRecord) -> Result<PullOutcome> {
        let local = self.local.get(payload.record_type, &payload.id).await?;
        if local.is_some_and(|local| payload.version <= local.version) {
            return Ok(PullOutcome::Unchanged);
        }
        self.apply_remote(payload).await
    }

    async fn adopt(&self, mut remote: SyncRecord, expected: Option<u64>) -> Result<PullOutcome> {
        remote.sync_status = SyncStatus::Synced;
        remote.local_id = remote.id.to_string();
        if !self.local.put_if_version(&remote, expected).await? {
            return Ok(PullOutcome::Unchanged);
        }
        tracing::debug!(
            record_type = %remote.record_type,
            record_id = %remote.id,
            version = remote.version,
            "Adopted remote snapshot"
        );
        Ok(PullOutcome::Adopted)
    }

    async fn resolve_phase(&self, stats: &mut CycleStats) {
        if self.config.strategy == ConflictStrategy::Manual {
            return;
        }
        let conflicts = match self.ledger.unresolved().await {
            Ok(conflicts) => conflicts,
            Err(error) => {
                tracing::warn!("Failed to load open conflicts: {}", error);
                stats.failed += 1;
                return;
            }
        };

        for group in group_by_record(conflicts) {
            match self.resolve_group(&group, self.config.strategy).await {
                Ok(_) => stats.conflicts_resolved += group.len(),
                Err(error) => {
                    tracing::warn!(
                        record_id = %group[0].record_id,
                        "Failed to resolve conflict: {}",
                        error
                    );
                    stats.failed += 1;
                }
            }
        }
    }

    /// Resolve every open conflict of one record against the newest remote.
    ///
    /// The resolved record is stored `PENDING` before it is published and
    /// marked `SYNCED` once the publication succeeds. A record edited
    /// locally while the group was read is left open for the next attempt.
    async fn resolve_group(
        &self,
        conflicts: &[SyncConflict],
        strategy: ConflictStrategy,
    ) -> Result<SyncRecord> {
        let newest = conflicts
            .iter()
            .max_by_key(|conflict| conflict.remote_version)
            .ok_or_else(|| Error::InvalidInput("no conflicts to resolve".into()))?;
        let stored = self
            .local
            .get(newest.record_type, &newest.record_id)
            .await?;
        let expected = stored.as_ref().map(|record| record.version);
        let local = stored.unwrap_or_else(|| newest.local_payload.clone());

        let mut resolved =
            resolve(&local, &newest.remote_payload, strategy, &self.device_id).ok_or_else(|| {
                Error::InvalidInput(format!("strategy {strategy} does not resolve conflicts"))
            })?;

        resolved.sync_status = SyncStatus::Pending;
        if !self.local.put_if_version(&resolved, expected).await? {
            return Err(Error::InvalidInput(format!(
                "{} {} changed while resolving",
                resolved.record_type, resolved.id
            )));
        }
        match self.publish(&resolved, EnvelopeKind::ConflictResolution).await {
            Ok(()) => {
                self.set_status(&mut resolved, SyncStatus::Synced).await?;
            }
            Err(error) => {
                tracing::warn!(
                    record_id = %resolved.id,
                    "Resolution stored locally, publish deferred: {}",
                    error
                );
            }
        }
        for conflict in conflicts {
            self.ledger.mark_resolved(conflict, strategy).await?;
        }

        tracing::info!(
            record_type = %resolved.record_type,
            record_id = %resolved.id,
            version = resolved.version,
            %strategy,
            "Conflict resolved"
        );
        Ok(resolved)
    }

    /// Resolve a conflict by explicit decision, along with any other open
    /// conflict on the same record.
    ///
    /// Waits for an in-flight cycle to finish first.
    pub async fn resolve_conflict(
        &self,
        conflict_id: &str,
        strategy: ConflictStrategy,
    ) -> Result<SyncRecord> {
        if strategy == ConflictStrategy::Manual {
            return Err(Error::InvalidInput(
                "pick local_wins, remote_wins or merge to resolve a conflict".into(),
            ));
        }
        let _guard = self.in_flight.lock().await;

        let conflict = self.ledger.get(conflict_id).await?;
        if conflict.resolved {
            return Err(Error::InvalidInput(format!(
                "conflict {conflict_id} is already resolved"
            )));
        }
        let group = self
            .ledger
            .unresolved_for(conflict.record_type, &conflict.record_id)
            .await?;
        let resolved = self.resolve_group(&group, strategy).await?;
        if let Err(error) = self.trim_messages().await {
            tracing::warn!("Failed to trim change list: {}", error);
        }
        self.record_metadata(unix_millis_now()).await?;
        Ok(resolved)
    }

    /// Ask peers to run a cycle soon
    pub async fn request_sync(&self) -> Result<()> {
        let envelope = Envelope::sync_request(self.device_id.clone(), unix_millis_now());
        self.remote
            .list_push(&self.config.messages_key(), &envelope.to_json()?)
            .await?;
        self.trim_messages().await
    }

    /// Sync metadata for this device, default when no cycle ran yet
    pub async fn metadata(&self) -> Result<DeviceSyncMetadata> {
        Ok(self
            .local
            .get_metadata(&self.device_id)
            .await?
            .unwrap_or_else(|| DeviceSyncMetadata::new(self.device_id.clone())))
    }

    async fn record_metadata(&self, now_ms: i64) -> Result<()> {
        let mut pending = 0;
        for record_type in RecordType::ALL {
            pending += self
                .local
                .count(record_type, &RecordPredicate::Dirty)
                .await?;
        }

        let mut metadata = self.metadata().await?;
        metadata.last_sync_timestamp = now_ms;
        metadata.sync_version += 1;
        metadata.pending_count = pending;
        metadata.conflict_count = self.ledger.unresolved_count().await?;
        self.local.put_metadata(&metadata).await
    }

    /// Write the snapshot, then announce it on the change list
    async fn publish(&self, record: &SyncRecord, kind: EnvelopeKind) -> Result<()> {
        let mut snapshot = record.clone();
        snapshot.sync_status = SyncStatus::Synced;
        let body = serde_json::to_string(&snapshot)?;
        self.remote
            .set(&snapshot.snapshot_key(&self.config.namespace), &body)
            .await?;

        let change = ChangeRecord::from_record(&snapshot, &self.device_id, unix_millis_now());
        let envelope = match kind {
            EnvelopeKind::ConflictResolution => Envelope::conflict_resolution(&change)?,
            EnvelopeKind::Change | EnvelopeKind::SyncRequest => Envelope::change(&change)?,
        };
        self.remote
            .list_push(&self.config.messages_key(), &envelope.to_json()?)
            .await?;
        Ok(())
    }

    async fn trim_messages(&self) -> Result<()> {
        let key = self.config.messages_key();
        let keep = i64::try_from(self.config.message_retention).unwrap_or(i64::MAX);
        self.remote.list_trim(&key, -keep, -1).await?;
        self.remote
            .expire(&key, self.config.message_ttl_secs)
            .await?;
        Ok(())
    }

    /// Current remote snapshot; malformed snapshots read as absent so a
    /// push can overwrite them.
    async fn fetch_remote(&self, record_type: RecordType, id: &RecordId) -> Result<Option<SyncRecord>> {
        let key = crate::models::snapshot_key(&self.config.namespace, record_type, id);
        match self.fetch_key(&key).await {
            Err(Error::Serialization(error)) => {
                tracing::warn!(key = %key, "Overwriting malformed snapshot: {}", error);
                Ok(None)
            }
            Err(Error::InvalidInput(message)) => {
                tracing::warn!(key = %key, "Overwriting mismatched snapshot: {}", message);
                Ok(None)
            }
            other => other,
        }
    }

    async fn fetch_key(&self, key: &str) -> Result<Option<SyncRecord>> {
        let Some(raw) = self.remote.get(key).await? else {
            return Ok(None);
        };
        let record: SyncRecord = serde_json::from_str(&raw)?;
        if record.snapshot_key(&self.config.namespace) != key {
            return Err(Error::InvalidInput(format!(
                "snapshot under {key} describes {} {}",
                record.record_type, record.id
            )));
        }
        Ok(Some(record))
    }
}

/// Group conflicts per record, keeping first-detection order
fn group_by_record(conflicts: Vec<SyncConflict>) -> Vec<Vec<SyncConflict>> {
    let mut order: Vec<(RecordType, RecordId)> = Vec::new();
    let mut groups: HashMap<(RecordType, RecordId), Vec<SyncConflict>> = HashMap::new();
    for conflict in conflicts {
        let key = (conflict.record_type, conflict.record_id.clone());
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(conflict);
    }
    order
        .into_iter()
        .filter_map(|key| groups.remove(&key))
        .collect()
}
