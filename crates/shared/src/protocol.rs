use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ConversationId, MessageId, MessageRole};

pub const DEFAULT_CONVERSATION_TITLE: &str = "New conversation";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagSummary {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_name: Option<String>,
    #[serde(default)]
    pub tags: Vec<TagSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_count: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: MessageRole,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation: Option<ConversationId>,
}

impl Message {
    /// Local echo of a message the user just typed, shown before the server
    /// confirms it.
    pub fn optimistic(conversation: &ConversationId, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::local(),
            role: MessageRole::User,
            content: content.into(),
            timestamp: Some(Utc::now()),
            conversation: Some(conversation.normalize()),
        }
    }

    pub fn with_conversation(mut self, conversation: &ConversationId) -> Self {
        if self.conversation.is_none() {
            self.conversation = Some(conversation.normalize());
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ListConversationsQuery {
    pub page: u32,
    #[serde(rename = "pageSize")]
    pub page_size: u32,
}

impl Default for ListConversationsQuery {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateConversationRequest {
    pub title: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateConversationRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddMessageRequest {
    pub message: String,
    pub model_id: Option<String>,
    pub role: MessageRole,
}

/// Title for a conversation created implicitly by its first message: the
/// leading 30 characters, with `...` appended when the content is longer.
pub fn title_from_content(content: &str) -> String {
    const MAX_TITLE_CHARS: usize = 30;
    if content.is_empty() {
        return DEFAULT_CONVERSATION_TITLE.to_string();
    }
    let mut title: String = content.chars().take(MAX_TITLE_CHARS).collect();
    if content.chars().count() > MAX_TITLE_CHARS {
        title.push_str("...");
    }
    title
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn short_content_is_used_verbatim() {
        assert_eq!(title_from_content("Hello"), "Hello");
        assert_eq!(title_from_content(&"x".repeat(30)), "x".repeat(30));
    }

    #[test]
    fn long_content_is_truncated_with_ellipsis() {
        let content = "abcdefghij".repeat(4) + "klmno";
        assert_eq!(content.chars().count(), 45);
        assert_eq!(title_from_content(&content), format!("{}...", &content[..30]));
    }

    #[test]
    fn truncation_counts_characters_not_bytes() {
        let content = "日本語".repeat(11);
        let title = title_from_content(&content);
        assert_eq!(title.chars().count(), 33);
        assert!(title.ends_with("..."));
    }

    #[test]
    fn empty_content_gets_default_title() {
        assert_eq!(title_from_content(""), DEFAULT_CONVERSATION_TITLE);
    }

    #[test]
    fn conversation_tolerates_sparse_payloads() {
        let conversation: Conversation =
            serde_json::from_value(json!({"id": 3, "title": "Rust"})).expect("conversation");
        assert_eq!(conversation.id.as_str(), "3");
        assert!(conversation.tags.is_empty());
        assert_eq!(conversation.message_count, None);
    }

    #[test]
    fn message_parses_server_timestamp() {
        let message: Message = serde_json::from_value(json!({
            "id": 8,
            "role": "assistant",
            "content": "hi",
            "timestamp": "2024-05-01T10:00:00.123456+08:00"
        }))
        .expect("message");
        assert_eq!(message.id, MessageId::Server(8));
        assert_eq!(message.role, MessageRole::Assistant);
        assert!(message.timestamp.is_some());
    }

    #[test]
    fn list_query_uses_camel_case_page_size() {
        let encoded = serde_json::to_value(ListConversationsQuery::default()).expect("query");
        assert_eq!(encoded, json!({"page": 1, "pageSize": 10}));
    }
}
