//! Local mutation API
//!
//! Every write goes through [`Replica`], which bumps the version, stamps the
//! authoring device and marks the record `PENDING` so the next reconciliation
//! cycle pushes it.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::db::LocalStore;
use crate::error::{Error, Result};
use crate::models::{
    strip_reserved, Conversation, DeviceId, Message, MessageRole, RecordContent, RecordId,
    RecordType, SyncRecord, SyncStatus,
};
use crate::sync::SchedulerHandle;
use crate::util::unix_millis_now;

#[derive(Clone)]
pub struct Replica {
    store: Arc<dyn LocalStore>,
    device_id: DeviceId,
    notifier: Option<SchedulerHandle>,
}

impl Replica {
    pub fn new(store: Arc<dyn LocalStore>, device_id: DeviceId) -> Self {
        Self {
            store,
            device_id,
            notifier: None,
        }
    }

    /// Report every mutation to a running scheduler
    #[must_use]
    pub fn with_notifier(mut self, handle: SchedulerHandle) -> Self {
        self.notifier = Some(handle);
        self
    }

    pub const fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    pub async fn get(&self, record_type: RecordType, id: &RecordId) -> Result<Option<SyncRecord>> {
        self.store.get(record_type, id).await
    }

    /// Insert a new record at version 1
    pub async fn create<T: RecordContent>(&self, content: &T) -> Result<SyncRecord> {
        let record = SyncRecord::from_content(content, self.device_id.clone(), unix_millis_now())?;
        self.store.put(&record).await?;
        tracing::debug!(record_type = %record.record_type, record_id = %record.id, "Record created");
        self.notify();
        Ok(record)
    }

    /// Replace the content of a live record
    pub async fn update<T: RecordContent>(&self, id: &RecordId, content: &T) -> Result<SyncRecord> {
        let fields = content.to_fields()?;
        self.mutate(T::RECORD_TYPE, id, |record| {
            record.fields = fields;
            Ok(())
        })
        .await
    }

    /// Merge `fields` into a live record, keeping keys it does not mention
    pub async fn patch(
        &self,
        record_type: RecordType,
        id: &RecordId,
        fields: Map<String, Value>,
    ) -> Result<SyncRecord> {
        let fields = strip_reserved(fields);
        self.mutate(record_type, id, |record| {
            record.fields.extend(fields);
            Ok(())
        })
        .await
    }

    /// Tombstone a record; the deletion syncs like any other update
    pub async fn delete(&self, record_type: RecordType, id: &RecordId) -> Result<SyncRecord> {
        self.mutate(record_type, id, |record| {
            record.deleted = true;
            Ok(())
        })
        .await
    }

    async fn mutate<F>(&self, record_type: RecordType, id: &RecordId, apply: F) -> Result<SyncRecord>
    where
        F: FnOnce(&mut SyncRecord) -> Result<()> + Send,
    {
        let mut record = self
            .store
            .get(record_type, id)
            .await?
            .filter(|record| !record.deleted)
            .ok_or_else(|| Error::NotFound(format!("{record_type} {id}")))?;

        apply(&mut record)?;
        record.version += 1;
        // lastModified never moves backwards, even under clock skew
        record.last_modified = unix_millis_now().max(record.last_modified + 1);
        record.device_id = self.device_id.clone();
        record.sync_status = SyncStatus::Pending;
        self.store.put(&record).await?;

        tracing::debug!(
            record_type = %record.record_type,
            record_id = %record.id,
            version = record.version,
            deleted = record.deleted,
            "Record updated"
        );
        self.notify();
        Ok(record)
    }

    fn notify(&self) {
        if let Some(handle) = &self.notifier {
            handle.notify_mutation();
        }
    }

    pub async fn create_conversation(&self, title: &str) -> Result<SyncRecord> {
        let title = title.trim();
        if title.is_empty() {
            return Err(Error::InvalidInput("conversation title must not be empty".into()));
        }
        self.create(&Conversation::new(title)).await
    }

    pub async fn rename_conversation(&self, id: &RecordId, title: &str) -> Result<SyncRecord> {
        let title = title.trim();
        if title.is_empty() {
            return Err(Error::InvalidInput("conversation title must not be empty".into()));
        }
        let mut fields = Map::new();
        fields.insert("title".into(), Value::String(title.to_string()));
        self.patch(RecordType::Conversation, id, fields).await
    }

    /// Tombstone a conversation and its live messages.
    ///
    /// Returns how many messages were tombstoned alongside it.
    pub async fn delete_conversation(&self, id: &RecordId) -> Result<usize> {
        self.delete(RecordType::Conversation, id).await?;
        let messages = self.messages(id).await?;
        for message in &messages {
            self.delete(RecordType::Message, &message.id).await?;
        }
        Ok(messages.len())
    }

    pub async fn add_message(
        &self,
        conversation_id: &RecordId,
        role: MessageRole,
        content: &str,
    ) -> Result<SyncRecord> {
        let conversation = self
            .store
            .get(RecordType::Conversation, conversation_id)
            .await?
            .filter(|record| !record.deleted)
            .ok_or_else(|| Error::NotFound(format!("conversation {conversation_id}")))?;

        let message = Message::new(conversation.id.as_str(), role, content);
        if message.is_empty() {
            return Err(Error::InvalidInput("message content must not be empty".into()));
        }
        self.create(&message).await
    }

    /// Live conversations, most recently modified first
    pub async fn conversations(&self) -> Result<Vec<SyncRecord>> {
        self.store.list(RecordType::Conversation, false).await
    }

    /// Live messages of one conversation, oldest first
    pub async fn messages(&self, conversation_id: &RecordId) -> Result<Vec<SyncRecord>> {
        let mut messages: Vec<SyncRecord> = self
            .store
            .query_by_field(
                RecordType::Message,
                "conversationId",
                &Value::String(conversation_id.to_string()),
            )
            .await?
            .into_iter()
            .filter(|record| !record.deleted)
            .collect();
        messages.sort_by(|a, b| {
            a.last_modified
                .cmp(&b.last_modified)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryLocalStore;
    use pretty_assertions::assert_eq;

    fn replica() -> Replica {
        Replica::new(Arc::new(MemoryLocalStore::new()), DeviceId::from("dev-1"))
    }

    #[tokio::test]
    async fn create_starts_pending_at_version_one() {
        let replica = replica();
        let record = replica.create_conversation("Trip plans").await.unwrap();
        assert_eq!(record.version, 1);
        assert_eq!(record.sync_status, SyncStatus::Pending);
        assert_eq!(record.local_id, record.id.to_string());
        assert_eq!(record.device_id, DeviceId::from("dev-1"));

        let content: Conversation = record.content().unwrap();
        assert_eq!(content.title, "Trip plans");
    }

    #[tokio::test]
    async fn update_bumps_version_and_marks_pending() {
        let replica = replica();
        let mut record = replica.create_conversation("Draft").await.unwrap();
        record.sync_status = SyncStatus::Synced;
        replica.store.put(&record).await.unwrap();

        let renamed = replica.rename_conversation(&record.id, "Final").await.unwrap();
        assert_eq!(renamed.version, 2);
        assert_eq!(renamed.sync_status, SyncStatus::Pending);
        assert_eq!(renamed.field_str("title"), Some("Final"));
        assert!(renamed.last_modified > record.last_modified);
    }

    #[tokio::test]
    async fn delete_tombstones_and_hides_from_listing() {
        let replica = replica();
        let record = replica.create_conversation("Old").await.unwrap();
        let deleted = replica.delete(RecordType::Conversation, &record.id).await.unwrap();
        assert!(deleted.deleted);
        assert_eq!(deleted.version, 2);
        assert!(replica.conversations().await.unwrap().is_empty());

        let error = replica
            .rename_conversation(&record.id, "Again")
            .await
            .unwrap_err();
        assert!(matches!(error, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn messages_are_scoped_and_ordered() {
        let replica = replica();
        let chat = replica.create_conversation("Chat").await.unwrap();
        let other = replica.create_conversation("Other").await.unwrap();

        let first = replica
            .add_message(&chat.id, MessageRole::User, "hello")
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let second = replica
            .add_message(&chat.id, MessageRole::Assistant, "hi there")
            .await
            .unwrap();
        replica
            .add_message(&other.id, MessageRole::User, "elsewhere")
            .await
            .unwrap();

        let ids: Vec<RecordId> = replica
            .messages(&chat.id)
            .await
            .unwrap()
            .into_iter()
            .map(|record| record.id)
            .collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }

    #[tokio::test]
    async fn add_message_validates_input() {
        let replica = replica();
        let chat = replica.create_conversation("Chat").await.unwrap();
        assert!(replica
            .add_message(&chat.id, MessageRole::User, "   ")
            .await
            .is_err());
        assert!(replica
            .add_message(&RecordId::new(), MessageRole::User, "hi")
            .await
            .is_err());
        assert!(replica.create_conversation(" ").await.is_err());
    }

    #[tokio::test]
    async fn delete_conversation_cascades_to_messages() {
        let replica = replica();
        let chat = replica.create_conversation("Chat").await.unwrap();
        replica
            .add_message(&chat.id, MessageRole::User, "one")
            .await
            .unwrap();
        replica
            .add_message(&chat.id, MessageRole::User, "two")
            .await
            .unwrap();

        assert_eq!(replica.delete_conversation(&chat.id).await.unwrap(), 2);
        assert!(replica.messages(&chat.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn patch_ignores_reserved_keys() {
        let replica = replica();
        let chat = replica.create_conversation("Chat").await.unwrap();
        let mut fields = Map::new();
        fields.insert("version".into(), Value::from(99));
        fields.insert("pinned".into(), Value::Bool(true));

        let patched = replica
            .patch(RecordType::Conversation, &chat.id, fields)
            .await
            .unwrap();
        assert_eq!(patched.version, 2);
        assert_eq!(patched.fields.get("pinned"), Some(&Value::Bool(true)));
    }
}
