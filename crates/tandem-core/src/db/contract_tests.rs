//! Behavior every `LocalStore` implementation must share

use pretty_assertions::assert_eq;
use serde_json::json;

use super::{LocalStore, MemoryLocalStore, RecordPredicate, SqliteLocalStore};
use crate::models::{
    ConflictStrategy, Conversation, DeviceId, DeviceSyncMetadata, Message, MessageRole,
    RecordContent, RecordType, SyncConflict, SyncRecord, SyncStatus,
};

fn stores() -> Vec<(&'static str, Box<dyn LocalStore>)> {
    vec![
        ("memory", Box::new(MemoryLocalStore::new()) as Box<dyn LocalStore>),
        (
            "sqlite",
            Box::new(SqliteLocalStore::open_in_memory().unwrap()) as Box<dyn LocalStore>,
        ),
    ]
}

fn conversation(title: &str, at: i64) -> SyncRecord {
    SyncRecord::from_content(&Conversation::new(title), DeviceId::from("dev-a"), at).unwrap()
}

fn message(conversation_id: &str, content: &str, at: i64) -> SyncRecord {
    let message = Message::new(conversation_id, MessageRole::User, content);
    SyncRecord::from_content(&message, DeviceId::from("dev-a"), at).unwrap()
}

#[tokio::test]
async fn put_then_get_returns_identical_record() {
    for (name, store) in stores() {
        let record = conversation("Hello", 10);
        store.put(&record).await.unwrap();

        let fetched = store
            .get(RecordType::Conversation, &record.id)
            .await
            .unwrap();
        assert_eq!(fetched, Some(record.clone()), "{name}");

        let wrong_type = store.get(RecordType::Message, &record.id).await.unwrap();
        assert_eq!(wrong_type, None, "{name}");
    }
}

#[tokio::test]
async fn put_replaces_existing_record() {
    for (name, store) in stores() {
        let mut record = conversation("Draft", 10);
        store.put(&record).await.unwrap();

        record.version = 2;
        record.fields.insert("title".into(), json!("Final"));
        store.put(&record).await.unwrap();

        let fetched = store
            .get(RecordType::Conversation, &record.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.version, 2, "{name}");
        assert_eq!(fetched.field_str("title"), Some("Final"), "{name}");
        assert_eq!(
            store
                .count(RecordType::Conversation, &RecordPredicate::All)
                .await
                .unwrap(),
            1,
            "{name}"
        );
    }
}

#[tokio::test]
async fn put_if_version_only_writes_the_expected_version() {
    for (name, store) in stores() {
        let mut record = conversation("First", 10);
        assert!(!store.put_if_version(&record, Some(1)).await.unwrap(), "{name}");
        assert!(store.put_if_version(&record, None).await.unwrap(), "{name}");
        assert!(!store.put_if_version(&record, None).await.unwrap(), "{name}");

        record.version = 2;
        record.fields.insert("title".into(), json!("Second"));
        store.put(&record).await.unwrap();

        let mut stale = record.clone();
        stale.version = 1;
        stale.sync_status = SyncStatus::Synced;
        assert!(!store.put_if_version(&stale, Some(1)).await.unwrap(), "{name}");

        let mut confirmed = record.clone();
        confirmed.sync_status = SyncStatus::Synced;
        assert!(store.put_if_version(&confirmed, Some(2)).await.unwrap(), "{name}");

        let fetched = store
            .get(RecordType::Conversation, &record.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched, confirmed, "{name}");
    }
}

async fn count(store: &dyn LocalStore, predicate: RecordPredicate) -> u64 {
    store
        .count(RecordType::Conversation, &predicate)
        .await
        .unwrap()
}

#[tokio::test]
async fn query_by_status_and_count() {
    for (name, store) in stores() {
        let pending = conversation("a", 1);
        let mut syncing = conversation("b", 2);
        syncing.sync_status = SyncStatus::Syncing;
        let mut synced = conversation("c", 3);
        synced.sync_status = SyncStatus::Synced;
        synced.deleted = true;
        for record in [&pending, &syncing, &synced] {
            store.put(record).await.unwrap();
        }

        let found = store
            .query_by_status(RecordType::Conversation, SyncStatus::Pending)
            .await
            .unwrap();
        assert_eq!(found, vec![pending.clone()], "{name}");

        let store = store.as_ref();
        assert_eq!(count(store, RecordPredicate::All).await, 3, "{name}");
        assert_eq!(count(store, RecordPredicate::Dirty).await, 2, "{name}");
        assert_eq!(count(store, RecordPredicate::Live).await, 2, "{name}");
        assert_eq!(
            count(store, RecordPredicate::Status(SyncStatus::Synced)).await,
            1,
            "{name}"
        );
    }
}

#[tokio::test]
async fn query_by_field_matches_json_values() {
    for (name, store) in stores() {
        let first = message("c1", "hi", 1);
        let second = message("c1", "there", 2);
        let other = message("c2", "elsewhere", 3);
        for record in [&first, &second, &other] {
            store.put(record).await.unwrap();
        }

        let found = store
            .query_by_field(RecordType::Message, "conversationId", &json!("c1"))
            .await
            .unwrap();
        assert_eq!(found, vec![second.clone(), first.clone()], "{name}");

        let none = store
            .query_by_field(RecordType::Message, "conversationId", &json!("c9"))
            .await
            .unwrap();
        assert!(none.is_empty(), "{name}");
    }
}

#[tokio::test]
async fn list_orders_newest_first_and_hides_tombstones() {
    for (name, store) in stores() {
        let old = conversation("old", 1);
        let new = conversation("new", 5);
        let mut gone = conversation("gone", 9);
        gone.deleted = true;
        for record in [&old, &new, &gone] {
            store.put(record).await.unwrap();
        }

        let live = store.list(RecordType::Conversation, false).await.unwrap();
        assert_eq!(live, vec![new.clone(), old.clone()], "{name}");

        let all = store.list(RecordType::Conversation, true).await.unwrap();
        assert_eq!(all.len(), 3, "{name}");
        assert_eq!(all[0].id, gone.id, "{name}");
    }
}

#[tokio::test]
async fn conflicts_are_listed_and_resolved() {
    for (name, store) in stores() {
        let local = conversation("mine", 1);
        let mut remote = local.clone();
        remote.version = 3;
        remote.fields = Conversation::new("theirs").to_fields().unwrap();

        let mut first = SyncConflict::new(&local, &remote, 100);
        let second = SyncConflict::new(&local, &remote, 200);
        store.insert_conflict(&first).await.unwrap();
        store.insert_conflict(&second).await.unwrap();

        let open = store.unresolved_conflicts().await.unwrap();
        assert_eq!(open, vec![first.clone(), second.clone()], "{name}");

        first.resolved = true;
        first.resolution_used = Some(ConflictStrategy::LocalWins);
        store.update_conflict(&first).await.unwrap();

        let open = store.unresolved_conflicts().await.unwrap();
        assert_eq!(open, vec![second.clone()], "{name}");
        assert_eq!(
            store.get_conflict(&first.id).await.unwrap(),
            Some(first.clone()),
            "{name}"
        );

        let recent = store.list_conflicts(10, true).await.unwrap();
        assert_eq!(recent, vec![second.clone(), first.clone()], "{name}");
        let recent_open = store.list_conflicts(10, false).await.unwrap();
        assert_eq!(recent_open.len(), 1, "{name}");
        assert_eq!(store.list_conflicts(1, true).await.unwrap().len(), 1, "{name}");
    }
}

#[tokio::test]
async fn metadata_and_settings_upsert() {
    for (name, store) in stores() {
        let device = DeviceId::from("dev-a");
        assert_eq!(store.get_metadata(&device).await.unwrap(), None, "{name}");

        let mut metadata = DeviceSyncMetadata::new(device.clone());
        metadata.sync_version = 1;
        metadata.last_sync_timestamp = 50;
        store.put_metadata(&metadata).await.unwrap();
        metadata.sync_version = 2;
        metadata.pending_count = 4;
        store.put_metadata(&metadata).await.unwrap();
        assert_eq!(
            store.get_metadata(&device).await.unwrap(),
            Some(metadata.clone()),
            "{name}"
        );

        assert_eq!(store.get_setting("device_id").await.unwrap(), None, "{name}");
        store.set_setting("device_id", "x").await.unwrap();
        store.set_setting("device_id", "y").await.unwrap();
        assert_eq!(
            store.get_setting("device_id").await.unwrap().as_deref(),
            Some("y"),
            "{name}"
        );
    }
}
