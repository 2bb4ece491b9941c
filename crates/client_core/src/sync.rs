use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use shared::{
    domain::{ConversationId, MessageRole},
    protocol::{
        title_from_content, Conversation, ListConversationsQuery, Message,
        UpdateConversationRequest,
    },
};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    config::ClientSettings,
    conversation_api::{conversation_path, AddMessageReply, ConversationApi},
    dedup::RequestDedup,
    error::{ClientError, ClientResult},
    transport::{CredentialStore, HttpTransport, Transport},
    ClientEvent,
};

/// Read-only view of the synchronizer state handed to views.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatSnapshot {
    pub conversations: Vec<Conversation>,
    pub current_conversation: Option<Conversation>,
    pub current_messages: Vec<Message>,
    pub loading: bool,
    pub error: Option<String>,
    pub last_loaded_conversation_id: Option<ConversationId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SendOutcome {
    /// Canonical id the message was sent to.
    pub conversation_id: ConversationId,
    /// The conversation was created by this send.
    pub created: bool,
    /// The response carried the confirmed messages; `false` means the send
    /// went through but the local sequence could not be reconciled.
    pub reconciled: bool,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    pub optimistic_echo: bool,
    pub page_size: u32,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            optimistic_echo: false,
            page_size: 10,
        }
    }
}

#[derive(Default)]
struct SyncState {
    view: ChatSnapshot,
    /// Canonical id the message sequence belongs to.
    active: Option<ConversationId>,
    /// Bumped on every navigation; responses issued under an older value are
    /// not applied.
    context: u64,
    loading_ops: usize,
}

impl SyncState {
    /// Makes `id` the active conversation and returns the context its
    /// responses must match. Switching conversations drops the previous
    /// message sequence.
    fn enter(&mut self, id: &ConversationId) -> u64 {
        let id = id.normalize();
        if self.active.as_ref() != Some(&id) {
            self.active = Some(id.clone());
            self.context += 1;
            self.view.current_messages.clear();
            if self
                .view
                .current_conversation
                .as_ref()
                .is_some_and(|current| !current.id.same_resource(&id))
            {
                self.view.current_conversation = None;
            }
        }
        self.context
    }

    fn leave(&mut self) -> Option<ConversationId> {
        self.context += 1;
        self.view.current_conversation = None;
        self.view.current_messages.clear();
        self.view.last_loaded_conversation_id = None;
        self.active.take()
    }
}

/// Owns the active conversation, its message sequence and the visible
/// conversation list, and reconciles server responses into them.
pub struct ConversationSync {
    api: ConversationApi,
    state: Mutex<SyncState>,
    events: broadcast::Sender<ClientEvent>,
    options: SyncOptions,
}

impl ConversationSync {
    pub fn new(
        api: ConversationApi,
        events: broadcast::Sender<ClientEvent>,
        options: SyncOptions,
    ) -> Self {
        Self {
            api,
            state: Mutex::new(SyncState::default()),
            events,
            options,
        }
    }

    pub fn new_with_dependencies(
        transport: Arc<dyn Transport>,
        dedup: Arc<RequestDedup>,
        settings: &ClientSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(1024);
        let api = ConversationApi::new(transport, dedup, settings.dedup_policy);
        Self::new(api, events, SyncOptions::from(settings))
    }

    /// Synchronizer talking HTTP to `settings.api_base_url`.
    pub fn from_settings(
        settings: &ClientSettings,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<Self> {
        let (events, _) = broadcast::channel(1024);
        let transport = HttpTransport::new(
            &settings.api_base_url,
            settings.request_timeout,
            settings.auth_scheme.clone(),
            credentials,
            events.clone(),
        )?;
        let dedup = Arc::new(RequestDedup::new(settings.in_flight_max_age));
        let api = ConversationApi::new(Arc::new(transport), dedup, settings.dedup_policy);
        Ok(Self::new(api, events, SyncOptions::from(settings)))
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn dedup(&self) -> &Arc<RequestDedup> {
        self.api.dedup()
    }

    pub fn default_list_query(&self) -> ListConversationsQuery {
        ListConversationsQuery {
            page: 1,
            page_size: self.options.page_size,
        }
    }

    /// Fetches the visible conversation list. Never fails: a transport error
    /// or a non-sequence payload yields an empty list.
    pub async fn load_list(&self, params: ListConversationsQuery) -> Vec<Conversation> {
        match self.api.list_conversations(params).await {
            Ok(conversations) => {
                self.lock().view.conversations = conversations.clone();
                info!(count = conversations.len(), "sync: conversation list replaced");
                self.emit(ClientEvent::ConversationsReplaced {
                    count: conversations.len(),
                });
                conversations
            }
            Err(err) if err.is_superseded() => {
                debug!("sync: list load already in flight; serving current list");
                self.conversations()
            }
            Err(err) => {
                warn!(%err, "sync: conversation list unavailable");
                self.record_error(&err);
                Vec::new()
            }
        }
    }

    /// Fetches one conversation and makes it active. The `"new"` sentinel
    /// clears the active conversation without I/O.
    pub async fn load_one(&self, id: &ConversationId) -> ClientResult<Option<Conversation>> {
        if id.normalize().is_new_sentinel() {
            self.lock().leave();
            self.emit(ClientEvent::ConversationSelected(None));
            return Ok(None);
        }

        let context = self.lock().enter(id);
        match self.api.get_conversation(id).await {
            Ok(conversation) => {
                let applied = {
                    let mut state = self.lock();
                    let applied = state.context == context;
                    if applied {
                        state.view.current_conversation = Some(conversation.clone());
                    }
                    applied
                };
                if applied {
                    self.emit(ClientEvent::ConversationSelected(Some(conversation.clone())));
                } else {
                    debug!(conversation_id = %id, "sync: discarding stale conversation response");
                }
                Ok(Some(conversation))
            }
            Err(err) => {
                if err.is_superseded() {
                    debug!(conversation_id = %id, "sync: conversation load already in flight");
                } else {
                    warn!(conversation_id = %id, %err, "sync: conversation load failed");
                    self.record_error(&err);
                }
                Err(err)
            }
        }
    }

    /// Replaces the message sequence with the server history. Never fails: on
    /// error the sequence is reset to empty and the error recorded.
    pub async fn load_messages(&self, id: &ConversationId) -> Vec<Message> {
        if id.normalize().is_new_sentinel() {
            let mut state = self.lock();
            state.view.current_messages.clear();
            return Vec::new();
        }

        let context = self.lock().enter(id);
        match self.api.list_messages(id).await {
            Ok(messages) => {
                let applied = {
                    let mut state = self.lock();
                    let applied = state.context == context;
                    if applied {
                        state.view.current_messages = messages.clone();
                        state.view.last_loaded_conversation_id = Some(id.normalize());
                    }
                    applied
                };
                if applied {
                    self.emit(ClientEvent::MessagesReplaced {
                        conversation_id: id.normalize(),
                        count: messages.len(),
                    });
                } else {
                    debug!(conversation_id = %id, "sync: discarding stale message history");
                }
                messages
            }
            Err(err) if err.is_superseded() => {
                debug!(conversation_id = %id, "sync: message load already in flight");
                self.messages()
            }
            Err(err) => {
                warn!(conversation_id = %id, %err, "sync: message history unavailable");
                {
                    let mut state = self.lock();
                    if state.context == context {
                        state.view.current_messages.clear();
                    }
                }
                self.record_error(&err);
                Vec::new()
            }
        }
    }

    /// Sends `content`, creating a conversation first when no id (or the
    /// `"new"` sentinel) is given.
    pub async fn send(
        &self,
        content: &str,
        conversation_id: Option<&ConversationId>,
        model_id: Option<String>,
    ) -> ClientResult<SendOutcome> {
        let _loading = LoadingGuard::start(self);
        let outcome = self.send_inner(content, conversation_id, model_id).await;
        match &outcome {
            Err(err) if err.is_superseded() => debug!("sync: identical send already in flight"),
            Err(err) => {
                warn!(%err, "sync: send failed");
                self.record_error(err);
            }
            Ok(_) => {}
        }
        outcome
    }

    async fn send_inner(
        &self,
        content: &str,
        conversation_id: Option<&ConversationId>,
        model_id: Option<String>,
    ) -> ClientResult<SendOutcome> {
        let existing = conversation_id.filter(|id| !id.normalize().is_new_sentinel());
        let (target, created) = match existing {
            Some(id) => (id.normalize(), false),
            None => (self.create_for_first_message(content).await?, true),
        };

        let context = self.lock().enter(&target);
        let echo_id = if self.options.optimistic_echo {
            let echo = Message::optimistic(&target, content);
            let echo_id = echo.id;
            let mut state = self.lock();
            if state.context == context {
                state.view.current_messages.push(echo);
            }
            Some(echo_id)
        } else {
            None
        };

        let reply = match self.api.add_message(&target, content, model_id).await {
            Ok(reply) => reply,
            Err(err) => {
                if let Some(echo_id) = echo_id {
                    self.lock()
                        .view
                        .current_messages
                        .retain(|message| message.id != echo_id);
                }
                return Err(err);
            }
        };

        if let AddMessageReply::Unrecognized(payload) = &reply {
            warn!(
                conversation_id = %target,
                %payload,
                "sync: add_message response missing user_message/assistant_message"
            );
        }
        let reconciled = !matches!(reply, AddMessageReply::Unrecognized(_));
        let messages = reply.into_messages();

        let applied = {
            let mut state = self.lock();
            let applied = state.context == context;
            if applied {
                let mut incoming = messages.clone().into_iter().peekable();
                if let Some(echo_id) = echo_id {
                    // The echo only survives as the server-confirmed user
                    // message; an unconfirmed echo never stays in the sequence.
                    let confirmed = incoming.next_if(|message| message.role == MessageRole::User);
                    let echo_index = state
                        .view
                        .current_messages
                        .iter()
                        .position(|message| message.id == echo_id);
                    match (echo_index, confirmed) {
                        (Some(index), Some(confirmed)) => {
                            state.view.current_messages[index] = confirmed;
                        }
                        (Some(index), None) => {
                            state.view.current_messages.remove(index);
                        }
                        (None, Some(confirmed)) => state.view.current_messages.push(confirmed),
                        (None, None) => {}
                    }
                }
                state.view.current_messages.extend(incoming);
            }
            applied
        };

        if applied && !messages.is_empty() {
            self.emit(ClientEvent::MessagesAppended {
                conversation_id: target.clone(),
                messages: messages.clone(),
            });
        } else if !applied {
            debug!(conversation_id = %target, "sync: discarding stale send response");
        }

        Ok(SendOutcome {
            conversation_id: target,
            created,
            reconciled,
            messages,
        })
    }

    async fn create_for_first_message(&self, content: &str) -> ClientResult<ConversationId> {
        let title = title_from_content(content);
        let conversation = self.api.create_conversation(&title).await?;
        let id = conversation.id.normalize();
        info!(conversation_id = %id, %title, "sync: created conversation");
        {
            let mut state = self.lock();
            state.enter(&id);
            state.view.current_conversation = Some(conversation.clone());
            state.view.last_loaded_conversation_id = Some(id.clone());
            if !state
                .view
                .conversations
                .iter()
                .any(|existing| existing.id.same_resource(&id))
            {
                state.view.conversations.insert(0, conversation.clone());
            }
        }
        self.emit(ClientEvent::ConversationSelected(Some(conversation)));
        Ok(id)
    }

    /// Searches conversations by title, summary or message content. Never
    /// fails; a blank query returns nothing without I/O.
    pub async fn search(&self, query: &str) -> Vec<Conversation> {
        let query = query.trim();
        if query.is_empty() {
            return Vec::new();
        }
        let _loading = LoadingGuard::start(self);
        match self.api.search_conversations(query).await {
            Ok(found) => found,
            Err(err) => {
                warn!(%query, %err, "sync: search failed");
                self.record_error(&err);
                Vec::new()
            }
        }
    }

    pub async fn delete_conversation(&self, id: &ConversationId) -> ClientResult<()> {
        let _loading = LoadingGuard::start(self);
        if let Err(err) = self.api.delete_conversation(id).await {
            warn!(conversation_id = %id, %err, "sync: delete failed");
            self.record_error(&err);
            return Err(err);
        }

        let was_active = {
            let mut state = self.lock();
            state
                .view
                .conversations
                .retain(|conversation| !conversation.id.same_resource(id));
            let was_active = state
                .active
                .as_ref()
                .is_some_and(|active| active.same_resource(id));
            if was_active {
                state.leave();
            }
            was_active
        };
        info!(conversation_id = %id, "sync: conversation deleted");
        self.emit(ClientEvent::ConversationsReplaced {
            count: self.lock().view.conversations.len(),
        });
        if was_active {
            self.emit(ClientEvent::ConversationSelected(None));
        }
        Ok(())
    }

    pub async fn update_conversation(
        &self,
        id: &ConversationId,
        changes: &UpdateConversationRequest,
    ) -> ClientResult<Conversation> {
        let updated = match self.api.update_conversation(id, changes).await {
            Ok(updated) => updated,
            Err(err) => {
                warn!(conversation_id = %id, %err, "sync: update failed");
                self.record_error(&err);
                return Err(err);
            }
        };

        let mut state = self.lock();
        for conversation in state.view.conversations.iter_mut() {
            if conversation.id.same_resource(id) {
                *conversation = updated.clone();
            }
        }
        if let Some(current) = state.view.current_conversation.as_mut() {
            if current.id.same_resource(id) {
                *current = updated.clone();
            }
        }
        Ok(updated)
    }

    /// Resets the active conversation, its messages and the last-loaded id,
    /// and releases in-flight entries addressing the cleared conversation so
    /// a reload is not suppressed.
    pub fn clear(&self) {
        let cleared = {
            let mut state = self.lock();
            let last_loaded = state.view.last_loaded_conversation_id.clone();
            let current = state
                .view
                .current_conversation
                .as_ref()
                .map(|conversation| conversation.id.normalize());
            state.leave().or(last_loaded).or(current)
        };

        if let Some(id) = cleared {
            let prefix = conversation_path(&id);
            let released = self
                .api
                .dedup()
                .release_where(|key| key.path().starts_with(&prefix));
            debug!(conversation_id = %id, released, "sync: cleared active conversation");
        }
        self.emit(ClientEvent::ConversationSelected(None));
    }

    pub fn set_conversations(&self, conversations: Vec<Conversation>) {
        let count = conversations.len();
        self.lock().view.conversations = conversations;
        self.emit(ClientEvent::ConversationsReplaced { count });
    }

    pub fn clear_error(&self) {
        self.lock().view.error = None;
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        self.lock().view.clone()
    }

    pub fn conversations(&self) -> Vec<Conversation> {
        self.lock().view.conversations.clone()
    }

    pub fn current_conversation(&self) -> Option<Conversation> {
        self.lock().view.current_conversation.clone()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.lock().view.current_messages.clone()
    }

    pub fn error(&self) -> Option<String> {
        self.lock().view.error.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.lock().view.loading
    }

    pub fn last_loaded_conversation_id(&self) -> Option<ConversationId> {
        self.lock().view.last_loaded_conversation_id.clone()
    }

    fn record_error(&self, err: &ClientError) {
        if err.is_superseded() {
            return;
        }
        let message = err.to_string();
        self.lock().view.error = Some(message.clone());
        self.emit(ClientEvent::Error(message));
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    fn lock(&self) -> MutexGuard<'_, SyncState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl From<&ClientSettings> for SyncOptions {
    fn from(settings: &ClientSettings) -> Self {
        Self {
            optimistic_echo: settings.optimistic_echo,
            page_size: settings.page_size,
        }
    }
}

/// Keeps `loading` set while at least one user-facing operation runs, and
/// clears it on every exit path.
struct LoadingGuard<'a> {
    sync: &'a ConversationSync,
}

impl<'a> LoadingGuard<'a> {
    fn start(sync: &'a ConversationSync) -> Self {
        let mut state = sync.lock();
        state.loading_ops += 1;
        state.view.loading = true;
        Self { sync }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.sync.lock();
        state.loading_ops = state.loading_ops.saturating_sub(1);
        state.view.loading = state.loading_ops > 0;
    }
}

#[cfg(test)]
#[path = "tests/sync_tests.rs"]
mod tests;
