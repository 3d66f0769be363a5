//! Conflict resolution strategies

use crate::models::{ConflictStrategy, DeviceId, SyncRecord, SyncStatus};

/// Snapshot keys that never participate in a field-level merge.
const MERGE_SKIPPED_FIELDS: [&str; 2] = ["version", "lastModified"];

/// Resolve a divergent `(local, remote)` pair.
///
/// Returns `None` for [`ConflictStrategy::Manual`]. The resolved record
/// carries `max(local.version, remote.version) + 1`, the later of both
/// `lastModified` values and `device_id` as author, so the same inputs
/// always produce the same record.
pub fn resolve(
    local: &SyncRecord,
    remote: &SyncRecord,
    strategy: ConflictStrategy,
    device_id: &DeviceId,
) -> Option<SyncRecord> {
    let mut resolved = match strategy {
        ConflictStrategy::Manual => return None,
        ConflictStrategy::LocalWins => local.clone(),
        ConflictStrategy::RemoteWins => {
            let mut adopted = local.clone();
            adopted.fields = remote.fields.clone();
            adopted.deleted = remote.deleted;
            adopted
        }
        ConflictStrategy::Merge => merge(local, remote),
    };

    resolved.version = local.version.max(remote.version) + 1;
    resolved.last_modified = local.last_modified.max(remote.last_modified);
    resolved.device_id = device_id.clone();
    resolved.local_id = resolved.id.to_string();
    resolved.sync_status = SyncStatus::Synced;
    Some(resolved)
}

/// Field-level last-writer-wins.
///
/// A remote field replaces the local one only when the remote record was
/// modified strictly later; fields absent remotely are always kept.
fn merge(local: &SyncRecord, remote: &SyncRecord) -> SyncRecord {
    let mut merged = local.clone();
    if remote.last_modified <= local.last_modified {
        return merged;
    }

    for (key, value) in &remote.fields {
        if MERGE_SKIPPED_FIELDS.contains(&key.as_str()) {
            continue;
        }
        merged.fields.insert(key.clone(), value.clone());
    }
    merged.deleted = remote.deleted;
    merged
}
