use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use shared::{
    domain::{ConversationId, MessageRole},
    protocol::{
        AddMessageRequest, Conversation, CreateConversationRequest, ListConversationsQuery,
        Message, UpdateConversationRequest,
    },
};
use tracing::{debug, warn};

use crate::{
    dedup::{Admission, DedupPolicy, RequestDedup},
    error::{ClientError, ClientResult},
    operation_key::OperationKey,
    transport::{ApiRequest, Method, ResponseEnvelope, Transport},
};

pub const CONVERSATIONS_PATH: &str = "/api/conversations/";
pub const SEARCH_PATH: &str = "/api/conversations/search/";

/// Every conversation path is built from the canonical id, never the
/// placeholder form the UI routes on.
pub fn conversation_path(id: &ConversationId) -> String {
    format!("{CONVERSATIONS_PATH}{}/", id.normalize())
}

pub fn messages_path(id: &ConversationId) -> String {
    format!("{}messages/", conversation_path(id))
}

pub fn add_message_path(id: &ConversationId) -> String {
    format!("{}add_message/", conversation_path(id))
}

/// `add_message` payload, validated once here so callers never re-check
/// field presence.
#[derive(Debug, Clone, PartialEq)]
pub enum AddMessageReply {
    Confirmed {
        user_message: Message,
        assistant_message: Message,
    },
    Partial {
        user_message: Option<Message>,
        assistant_message: Option<Message>,
    },
    Unrecognized(Value),
}

impl AddMessageReply {
    fn from_value(data: Value, conversation: &ConversationId) -> Self {
        let user_message = decode_field::<Message>(&data, "user_message")
            .map(|message| message.with_conversation(conversation));
        let assistant_message = decode_field::<Message>(&data, "assistant_message")
            .map(|message| message.with_conversation(conversation));
        match (user_message, assistant_message) {
            (Some(user_message), Some(assistant_message)) => Self::Confirmed {
                user_message,
                assistant_message,
            },
            (None, None) => Self::Unrecognized(data),
            (user_message, assistant_message) => Self::Partial {
                user_message,
                assistant_message,
            },
        }
    }

    /// Messages to append, user message first.
    pub fn into_messages(self) -> Vec<Message> {
        match self {
            Self::Confirmed {
                user_message,
                assistant_message,
            } => vec![user_message, assistant_message],
            Self::Partial {
                user_message,
                assistant_message,
            } => user_message.into_iter().chain(assistant_message).collect(),
            Self::Unrecognized(_) => Vec::new(),
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed { .. })
    }
}

fn decode_field<T: DeserializeOwned>(data: &Value, field: &str) -> Option<T> {
    let value = data.get(field)?;
    match serde_json::from_value(value.clone()) {
        Ok(decoded) => Some(decoded),
        Err(err) => {
            warn!(field, %err, "api: ignoring malformed response field");
            None
        }
    }
}

/// Conversation endpoints, every call gated by the in-flight registry.
pub struct ConversationApi {
    transport: Arc<dyn Transport>,
    dedup: Arc<RequestDedup>,
    policy: DedupPolicy,
}

impl ConversationApi {
    pub fn new(
        transport: Arc<dyn Transport>,
        dedup: Arc<RequestDedup>,
        policy: DedupPolicy,
    ) -> Self {
        Self {
            transport,
            dedup,
            policy,
        }
    }

    pub fn dedup(&self) -> &Arc<RequestDedup> {
        &self.dedup
    }

    /// Sends `request` unless an identical one is in flight.
    ///
    /// Only reads may join: the key ignores the body, so a joined write would
    /// report another request's outcome as its own.
    pub async fn dispatch(&self, request: ApiRequest) -> ClientResult<ResponseEnvelope> {
        let key = OperationKey::for_request(&request);
        let may_join = self.policy == DedupPolicy::Join && request.method == Method::Get;
        match self.dedup.begin(key) {
            Admission::Proceed(ticket) => {
                let outcome = self
                    .transport
                    .execute(request)
                    .await
                    .map_err(ClientError::from);
                ticket.complete(&outcome);
                outcome
            }
            Admission::Duplicate(handle) if may_join => {
                debug!(key = %handle.key(), "api: joining in-flight request");
                handle.join().await
            }
            Admission::Duplicate(handle) => Err(handle.abort()),
        }
    }

    pub async fn list_conversations(
        &self,
        params: ListConversationsQuery,
    ) -> ClientResult<Vec<Conversation>> {
        let request = ApiRequest::get(CONVERSATIONS_PATH)
            .with_query("page", params.page.to_string())
            .with_query("pageSize", params.page_size.to_string());
        let envelope = self.dispatch(request).await?;
        decode_sequence("list_conversations", envelope.data)
    }

    pub async fn search_conversations(&self, query: &str) -> ClientResult<Vec<Conversation>> {
        let request = ApiRequest::get(SEARCH_PATH).with_query("q", query);
        let envelope = self.dispatch(request).await?;
        decode_sequence("search_conversations", envelope.data)
    }

    pub async fn get_conversation(&self, id: &ConversationId) -> ClientResult<Conversation> {
        let envelope = self.dispatch(ApiRequest::get(conversation_path(id))).await?;
        decode_object("get_conversation", envelope.data)
    }

    pub async fn create_conversation(&self, title: &str) -> ClientResult<Conversation> {
        let body = to_body(&CreateConversationRequest {
            title: title.to_string(),
        })?;
        let envelope = self
            .dispatch(ApiRequest::post(CONVERSATIONS_PATH, body))
            .await?;
        decode_object("create_conversation", envelope.data)
    }

    pub async fn update_conversation(
        &self,
        id: &ConversationId,
        changes: &UpdateConversationRequest,
    ) -> ClientResult<Conversation> {
        let body = to_body(changes)?;
        let envelope = self
            .dispatch(ApiRequest::put(conversation_path(id), body))
            .await?;
        decode_object("update_conversation", envelope.data)
    }

    pub async fn delete_conversation(&self, id: &ConversationId) -> ClientResult<()> {
        self.dispatch(ApiRequest::delete(conversation_path(id)))
            .await?;
        Ok(())
    }

    pub async fn list_messages(&self, id: &ConversationId) -> ClientResult<Vec<Message>> {
        let envelope = self.dispatch(ApiRequest::get(messages_path(id))).await?;
        let messages: Vec<Message> = decode_sequence("list_messages", envelope.data)?;
        Ok(messages
            .into_iter()
            .map(|message| message.with_conversation(id))
            .collect())
    }

    pub async fn add_message(
        &self,
        id: &ConversationId,
        content: &str,
        model_id: Option<String>,
    ) -> ClientResult<AddMessageReply> {
        let body = to_body(&AddMessageRequest {
            message: content.to_string(),
            model_id,
            role: MessageRole::User,
        })?;
        let envelope = self
            .dispatch(ApiRequest::post(add_message_path(id), body))
            .await?;
        Ok(AddMessageReply::from_value(envelope.data, id))
    }
}

fn to_body<T: serde::Serialize>(value: &T) -> ClientResult<Value> {
    serde_json::to_value(value).map_err(|err| ClientError::shape("request body", err.to_string()))
}

/// Accepts a bare array, or an object wrapping one under `data` (envelope
/// style) or `results` (paginated style).
fn decode_sequence<T: DeserializeOwned>(
    operation: &'static str,
    data: Value,
) -> ClientResult<Vec<T>> {
    let items = match data {
        Value::Array(items) => items,
        Value::Object(mut map) => match map
            .remove("data")
            .or_else(|| map.remove("results"))
        {
            Some(Value::Array(items)) => items,
            _ => return Err(ClientError::shape(operation, "expected a sequence")),
        },
        other => {
            return Err(ClientError::shape(
                operation,
                format!("expected a sequence, got {}", value_kind(&other)),
            ))
        }
    };

    let mut decoded = Vec::with_capacity(items.len());
    for item in items {
        match serde_json::from_value(item) {
            Ok(value) => decoded.push(value),
            Err(err) => warn!(operation, %err, "api: skipping malformed sequence item"),
        }
    }
    Ok(decoded)
}

fn decode_object<T: DeserializeOwned>(operation: &'static str, data: Value) -> ClientResult<T> {
    serde_json::from_value(data).map_err(|err| ClientError::shape(operation, err.to_string()))
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
#[path = "tests/conversation_api_tests.rs"]
mod tests;
