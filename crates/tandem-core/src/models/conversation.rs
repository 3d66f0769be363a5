//! Conversation and message content

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::record::{RecordContent, RecordType};
use crate::error::Error;

/// A conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub title: String,
    /// Model the conversation was held with, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub pinned: bool,
}

impl Conversation {
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            model: None,
            pinned: false,
        }
    }

    /// Get first line of the title, truncated to `max_len` characters
    #[must_use]
    pub fn title_preview(&self, max_len: usize) -> String {
        self.title
            .lines()
            .next()
            .unwrap_or("")
            .chars()
            .take(max_len)
            .collect()
    }
}

impl RecordContent for Conversation {
    const RECORD_TYPE: RecordType = RecordType::Conversation;
}

/// Author role of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    #[default]
    User,
    Assistant,
    System,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        })
    }
}

impl FromStr for MessageRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            other => Err(Error::InvalidInput(format!("unknown message role '{other}'"))),
        }
    }
}

/// A message inside a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Owning conversation's record id
    pub conversation_id: String,
    #[serde(default)]
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    #[must_use]
    pub fn new(
        conversation_id: impl Into<String>,
        role: MessageRole,
        content: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            role,
            content: content.into(),
        }
    }

    /// Check if message content is empty (whitespace-only counts as empty)
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty()
    }
}

impl RecordContent for Message {
    const RECORD_TYPE: RecordType = RecordType::Message;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeviceId, SyncRecord};

    #[test]
    fn test_conversation_fields_are_camel_case() {
        let mut conversation = Conversation::new("Trip planning");
        conversation.model = Some("small".to_string());
        let fields = conversation.to_fields().unwrap();
        assert_eq!(fields.get("title").unwrap(), "Trip planning");
        assert_eq!(fields.get("model").unwrap(), "small");
        assert_eq!(fields.get("pinned").unwrap(), false);
    }

    #[test]
    fn test_message_record_roundtrip_through_typed_view() {
        let message = Message::new("c1", MessageRole::Assistant, "Hello there");
        let record = SyncRecord::from_content(&message, DeviceId::from("d"), 5).unwrap();
        assert_eq!(record.record_type, RecordType::Message);
        assert_eq!(record.field_str("conversationId"), Some("c1"));
        assert_eq!(record.content::<Message>().unwrap(), message);
        assert!(record.content::<Conversation>().is_err());
    }

    #[test]
    fn test_title_preview() {
        let conversation = Conversation::new("First line\nSecond line");
        assert_eq!(conversation.title_preview(50), "First line");
        assert_eq!(conversation.title_preview(5), "First");
    }

    #[test]
    fn test_message_role_parse() {
        assert_eq!("Assistant".parse::<MessageRole>().unwrap(), MessageRole::Assistant);
        assert!("robot".parse::<MessageRole>().is_err());
        assert!(Message::new("c", MessageRole::User, "  ").is_empty());
    }
}
