//! Shared change list polling
//!
//! Peers announce every publication on `{ns}:messages`. Polling that list
//! lets a device apply changes between full cycles and notice sync requests.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use super::reconciler::{PullOutcome, Reconciler};
use crate::error::Result;
use crate::models::{ChangeRecord, Envelope};

const MIN_SEEN_CAPACITY: usize = 64;

/// Outcome of one pass over the change list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    /// A reconciliation cycle held the engine; nothing was read
    pub skipped: bool,
    /// Entries on the list when it was read
    pub received: usize,
    /// Changes from peers that altered the local replica
    pub applied: Vec<ChangeRecord>,
    /// Peer changes no newer than the local copy, or already in conflict
    pub unchanged: usize,
    pub own: usize,
    pub duplicates: usize,
    pub malformed: usize,
    pub failed: usize,
    /// A peer asked for a cycle
    pub sync_requested: bool,
}

pub struct ChangePoller {
    reconciler: Arc<Reconciler>,
    seen: HashSet<String>,
    seen_order: VecDeque<String>,
    capacity: usize,
}

impl ChangePoller {
    pub fn new(reconciler: Arc<Reconciler>) -> Self {
        let capacity = reconciler
            .config()
            .message_retention
            .saturating_mul(2)
            .max(MIN_SEEN_CAPACITY);
        Self {
            reconciler,
            seen: HashSet::new(),
            seen_order: VecDeque::new(),
            capacity,
        }
    }

    /// Read the change list and apply entries not seen before.
    ///
    /// Entries written by this device are ignored. Entries that fail to
    /// apply are retried on the next poll.
    pub async fn poll(&mut self) -> Result<PollReport> {
        let reconciler = Arc::clone(&self.reconciler);
        let Some(_guard) = reconciler.try_begin() else {
            return Ok(PollReport {
                skipped: true,
                ..PollReport::default()
            });
        };

        let entries = reconciler
            .remote()
            .list_range(&reconciler.config().messages_key(), 0, -1)
            .await?;
        let mut report = PollReport {
            received: entries.len(),
            ..PollReport::default()
        };

        for raw in entries {
            let identity = blake3::hash(raw.as_bytes()).to_hex().to_string();
            if self.seen.contains(&identity) {
                report.duplicates += 1;
                continue;
            }

            let envelope = match Envelope::from_json(&raw) {
                Ok(envelope) => envelope,
                Err(error) => {
                    tracing::debug!("Ignoring malformed change entry: {}", error);
                    report.malformed += 1;
                    self.remember(identity);
                    continue;
                }
            };
            if &envelope.device_id == reconciler.device_id() {
                report.own += 1;
                self.remember(identity);
                continue;
            }

            match envelope.change_record() {
                None => report.sync_requested = true,
                Some(Err(error)) => {
                    tracing::debug!("Ignoring change entry with bad payload: {}", error);
                    report.malformed += 1;
                }
                Some(Ok(change)) if change.payload.id != change.record_id => {
                    tracing::debug!(record_id = %change.record_id, "Ignoring mismatched change");
                    report.malformed += 1;
                }
                Some(Ok(mut change)) => {
                    match reconciler.apply_change(change.payload.clone()).await {
                        Ok(PullOutcome::Unchanged) => report.unchanged += 1,
                        Ok(_) => {
                            change.applied = true;
                            report.applied.push(change);
                        }
                        Err(error) => {
                            tracing::warn!(
                                record_id = %change.record_id,
                                "Failed to apply polled change: {}",
                                error
                            );
                            report.failed += 1;
                            continue;
                        }
                    }
                }
            }
            self.remember(identity);
        }

        if !report.applied.is_empty() || report.sync_requested {
            tracing::debug!(
                applied = report.applied.len(),
                sync_requested = report.sync_requested,
                "Change list polled"
            );
        }
        Ok(report)
    }

    fn remember(&mut self, identity: String) {
        if self.seen_order.len() >= self.capacity {
            if let Some(oldest) = self.seen_order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(identity.clone());
        self.seen_order.push_back(identity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::{BroadcastStore, MemoryBroadcastStore};
    use crate::config::SyncConfig;
    use crate::db::{LocalStore, MemoryLocalStore};
    use crate::models::{DeviceId, RecordType, SyncRecord, SyncStatus};
    use crate::replica::Replica;

    fn device(
        name: &str,
        remote: &MemoryBroadcastStore,
    ) -> (Arc<MemoryLocalStore>, Replica, Arc<Reconciler>) {
        let store = Arc::new(MemoryLocalStore::new());
        let device_id = DeviceId::from(name);
        let replica = Replica::new(store.clone(), device_id.clone());
        let reconciler = Arc::new(Reconciler::new(
            store.clone(),
            Arc::new(remote.clone()),
            SyncConfig::new("test"),
            device_id,
        ));
        (store, replica, reconciler)
    }

    #[tokio::test]
    async fn applies_peer_changes_once() {
        let remote = MemoryBroadcastStore::new();
        let (_, replica_a, reconciler_a) = device("dev-a", &remote);
        let (store_b, _, reconciler_b) = device("dev-b", &remote);

        let created = replica_a.create_conversation("Polled").await.unwrap();
        reconciler_a.run_cycle().await;

        let mut poller = ChangePoller::new(reconciler_b);
        let report = poller.poll().await.unwrap();
        assert_eq!(report.received, 1);
        assert_eq!(report.applied.len(), 1);
        assert!(report.applied[0].applied);

        let received = store_b
            .get(RecordType::Conversation, &created.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.sync_status, SyncStatus::Synced);

        let again = poller.poll().await.unwrap();
        assert_eq!(again.duplicates, 1);
        assert!(again.applied.is_empty());
    }

    #[tokio::test]
    async fn replayed_history_never_overwrites_a_local_edit() {
        let remote = MemoryBroadcastStore::new();
        let (store_a, replica_a, reconciler_a) = device("dev-a", &remote);
        let (_, replica_b, reconciler_b) = device("dev-b", &remote);

        let id = replica_b.create_conversation("B v1").await.unwrap().id;
        reconciler_b.run_cycle().await;
        replica_b.rename_conversation(&id, "B v2").await.unwrap();
        reconciler_b.run_cycle().await;
        reconciler_a.run_cycle().await;
        replica_b.rename_conversation(&id, "B v3").await.unwrap();
        replica_b.rename_conversation(&id, "B v4").await.unwrap();
        reconciler_b.run_cycle().await;
        replica_a.rename_conversation(&id, "A v3").await.unwrap();

        let report = ChangePoller::new(Arc::clone(&reconciler_a))
            .poll()
            .await
            .unwrap();
        assert_eq!(report.unchanged, 2);
        assert_eq!(report.applied.len(), 1);

        let snapshot_key = crate::models::snapshot_key("test", RecordType::Conversation, &id);
        let published: SyncRecord =
            serde_json::from_str(&remote.get(&snapshot_key).await.unwrap().unwrap()).unwrap();
        assert_eq!(published.version, 4);
        assert_eq!(published.field_str("title"), Some("B v4"));

        let local = store_a
            .get(RecordType::Conversation, &id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(local.version, 3);
        assert_eq!(local.field_str("title"), Some("A v3"));
        assert_eq!(local.sync_status, SyncStatus::Conflict);
        let open = reconciler_a.ledger().unresolved().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].remote_version, 4);

        let stats = reconciler_a.run_cycle().await;
        assert_eq!(stats.conflicts_resolved, 1);
        let resolved = store_a
            .get(RecordType::Conversation, &id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.version, 5);
        assert_eq!(resolved.field_str("title"), Some("A v3"));
    }

    #[tokio::test]
    async fn ignores_own_entries() {
        let remote = MemoryBroadcastStore::new();
        let (_, replica, reconciler) = device("dev-a", &remote);
        replica.create_conversation("Mine").await.unwrap();
        reconciler.run_cycle().await;

        let report = ChangePoller::new(reconciler).poll().await.unwrap();
        assert_eq!(report.own, 1);
        assert!(report.applied.is_empty());
        assert!(!report.sync_requested);
    }

    #[tokio::test]
    async fn reports_peer_sync_requests() {
        let remote = MemoryBroadcastStore::new();
        let (_, _, reconciler_a) = device("dev-a", &remote);
        let (_, _, reconciler_b) = device("dev-b", &remote);
        reconciler_a.request_sync().await.unwrap();

        let mut poller = ChangePoller::new(reconciler_b);
        assert!(poller.poll().await.unwrap().sync_requested);
        assert!(!poller.poll().await.unwrap().sync_requested);
    }

    #[tokio::test]
    async fn counts_malformed_entries_once() {
        let remote = MemoryBroadcastStore::new();
        remote.list_push("test:messages", "garbage").await.unwrap();
        remote
            .list_push(
                "test:messages",
                r#"{"type":"change","deviceId":"dev-x","timestamp":1,"payload":{"bad":true}}"#,
            )
            .await
            .unwrap();
        let (_, _, reconciler) = device("dev-b", &remote);

        let mut poller = ChangePoller::new(reconciler);
        assert_eq!(poller.poll().await.unwrap().malformed, 2);
        let again = poller.poll().await.unwrap();
        assert_eq!(again.malformed, 0);
        assert_eq!(again.duplicates, 2);
    }

    #[tokio::test]
    async fn skips_while_cycle_in_flight() {
        let remote = MemoryBroadcastStore::new();
        let (_, _, reconciler) = device("dev-a", &remote);
        let mut poller = ChangePoller::new(Arc::clone(&reconciler));

        let guard = reconciler.try_begin().unwrap();
        assert!(poller.poll().await.unwrap().skipped);
        drop(guard);
        assert!(!poller.poll().await.unwrap().skipped);
    }

    #[tokio::test]
    async fn unreachable_store_is_an_error() {
        let remote = MemoryBroadcastStore::new();
        let (_, _, reconciler) = device("dev-a", &remote);
        remote.set_unreachable(true);
        assert!(ChangePoller::new(reconciler).poll().await.is_err());
    }
}
