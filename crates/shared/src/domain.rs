use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Marker the UI prepends to conversation handles it routes on before the
/// server-assigned id is known (or to keep route keys distinct from raw ids).
pub const PENDING_CONVERSATION_PREFIX: &str = "chat-";

/// Route sentinel meaning "no conversation has been created yet".
pub const NEW_CONVERSATION_SENTINEL: &str = "new";

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Int(i64),
    Str(String),
}

/// Conversation handle, either pending (`chat-42`) or canonical (`42`).
///
/// The server emits integer primary keys; both integers and strings are
/// accepted on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Client-side placeholder form of a canonical id.
    pub fn pending(canonical: &ConversationId) -> Self {
        Self(format!(
            "{PENDING_CONVERSATION_PREFIX}{}",
            canonical.normalize().0
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_pending(&self) -> bool {
        self.0.starts_with(PENDING_CONVERSATION_PREFIX)
    }

    pub fn is_new_sentinel(&self) -> bool {
        self.0.is_empty() || self.0 == NEW_CONVERSATION_SENTINEL
    }

    /// Canonical server id for this handle. Every repeated marker is stripped
    /// so that `normalize` is idempotent.
    pub fn normalize(&self) -> ConversationId {
        Self(
            self.0
                .trim_start_matches(PENDING_CONVERSATION_PREFIX)
                .to_string(),
        )
    }

    /// Two handles address the same server resource.
    pub fn same_resource(&self, other: &ConversationId) -> bool {
        self.normalize() == other.normalize()
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ConversationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<i64> for ConversationId {
    fn from(value: i64) -> Self {
        Self(value.to_string())
    }
}

impl<'de> Deserialize<'de> for ConversationId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match RawId::deserialize(deserializer)? {
            RawId::Int(value) => Self(value.to_string()),
            RawId::Str(value) => Self(value),
        })
    }
}

/// Server-assigned message ids are integers; optimistic local echoes carry a
/// temporary uuid until the server confirms them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    Server(i64),
    Local(Uuid),
}

impl MessageId {
    pub fn local() -> Self {
        Self::Local(Uuid::new_v4())
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server(id) => write!(f, "{id}"),
            Self::Local(id) => write!(f, "local-{id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_pending_marker() {
        assert_eq!(ConversationId::from("chat-17").normalize().as_str(), "17");
        assert_eq!(ConversationId::from("17").normalize().as_str(), "17");
    }

    #[test]
    fn normalize_is_idempotent() {
        for raw in ["chat-5", "chat-chat-5", "5", "new", "", "chat-"] {
            let once = ConversationId::from(raw).normalize();
            assert_eq!(once.normalize(), once, "input {raw:?}");
        }
    }

    #[test]
    fn pending_round_trips_through_normalize() {
        let canonical = ConversationId::from(9);
        let pending = ConversationId::pending(&canonical);
        assert!(pending.is_pending());
        assert_eq!(pending.as_str(), "chat-9");
        assert!(pending.same_resource(&canonical));
    }

    #[test]
    fn deserializes_integer_and_string_ids() {
        let from_int: ConversationId = serde_json::from_str("12").expect("int id");
        let from_str: ConversationId = serde_json::from_str("\"chat-12\"").expect("str id");
        assert_eq!(from_int.as_str(), "12");
        assert!(from_str.same_resource(&from_int));
    }

    #[test]
    fn message_id_prefers_server_form_for_numbers() {
        let id: MessageId = serde_json::from_str("31").expect("message id");
        assert_eq!(id, MessageId::Server(31));
        assert!(MessageId::local().is_local());
    }
}
