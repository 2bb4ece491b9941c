use shared::{
    domain::ConversationId,
    protocol::{Conversation, Message},
};

pub mod config;
pub mod conversation_api;
pub mod dedup;
pub mod error;
pub mod operation_key;
pub mod sync;
pub mod transport;

pub use config::{load_settings, ClientSettings};
pub use conversation_api::{AddMessageReply, ConversationApi};
pub use dedup::{Admission, DedupPolicy, InFlightTicket, RequestDedup, SupersededHandle};
pub use error::{ClientError, ClientResult, TransportError, TransportErrorKind};
pub use operation_key::OperationKey;
pub use sync::{ChatSnapshot, ConversationSync, SendOutcome, SyncOptions};
pub use transport::{
    ApiRequest, CredentialStore, HttpTransport, MemoryCredentials, Method, MissingCredentials,
    ResponseEnvelope, Transport,
};

/// State changes broadcast to views.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    ConversationsReplaced {
        count: usize,
    },
    ConversationSelected(Option<Conversation>),
    MessagesReplaced {
        conversation_id: ConversationId,
        count: usize,
    },
    MessagesAppended {
        conversation_id: ConversationId,
        messages: Vec<Message>,
    },
    /// The server rejected the stored credential; it has been cleared.
    LoginRequired,
    Error(String),
}

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
