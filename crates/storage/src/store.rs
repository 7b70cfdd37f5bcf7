use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use super::events::StoreEvent;
use super::ids::{MessageId, SessionId};
use super::types::{
    ChatSession, ChatState, DEFAULT_SESSION_TITLE, Message, MessagePatch, MessageStatus, Role,
    SESSION_TITLE_MAX_CHARS, SendMessageParams, session_title_from,
};

/// Buffered change notifications per subscriber before it starts lagging.
pub const STORE_EVENT_CAPACITY: usize = 256;

/// Store handle shared by the controller and any observers.
///
/// Critical sections are short and synchronous; the lock is never held across an await.
pub type SharedStore = Arc<Mutex<SessionStore>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    pub default_session_title: String,
    pub title_max_chars: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            default_session_title: DEFAULT_SESSION_TITLE.to_string(),
            title_max_chars: SESSION_TITLE_MAX_CHARS,
        }
    }
}

/// In-memory registry of chat sessions and their messages.
pub struct SessionStore {
    state: ChatState,
    options: StoreOptions,
    events: broadcast::Sender<StoreEvent>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::with_options(StoreOptions::default())
    }

    pub fn with_options(options: StoreOptions) -> Self {
        let (events, _) = broadcast::channel(STORE_EVENT_CAPACITY);
        Self {
            state: ChatState::default(),
            options,
            events,
        }
    }

    pub fn shared(self) -> SharedStore {
        Arc::new(Mutex::new(self))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> &ChatState {
        &self.state
    }

    pub fn snapshot(&self) -> ChatState {
        self.state.clone()
    }

    pub fn sessions(&self) -> &[ChatSession] {
        &self.state.sessions
    }

    pub fn session(&self, session_id: SessionId) -> Option<&ChatSession> {
        self.state.session(session_id)
    }

    pub fn current_session_id(&self) -> Option<SessionId> {
        self.state.current_session_id
    }

    pub fn current_session(&self) -> Option<&ChatSession> {
        self.state.current_session()
    }

    pub fn is_loading(&self) -> bool {
        self.state.is_loading
    }

    pub fn is_streaming(&self) -> bool {
        self.state.is_streaming
    }

    /// Looks a message up in every session; message ids are globally unique.
    pub fn message(&self, message_id: MessageId) -> Option<&Message> {
        self.state
            .sessions
            .iter()
            .find_map(|session| session.message(message_id))
    }

    pub fn last_assistant_message(&self) -> Option<&Message> {
        self.current_session()
            .and_then(ChatSession::last_assistant_message)
    }

    pub fn create_session(&mut self, title: Option<String>) -> SessionId {
        let title = title.unwrap_or_else(|| self.options.default_session_title.clone());
        self.insert_session(ChatSession::new(title))
    }

    pub fn delete_session(&mut self, session_id: SessionId) {
        let before = self.state.sessions.len();
        self.state.sessions.retain(|session| session.id != session_id);
        if self.state.sessions.len() == before {
            return;
        }

        if self.state.current_session_id == Some(session_id) {
            self.state.current_session_id = None;
        }

        tracing::debug!(session_id = %session_id, "deleted session");
        self.publish(StoreEvent::SessionDeleted { session_id });
    }

    pub fn select_session(&mut self, session_id: SessionId) {
        if self.state.session(session_id).is_none() {
            tracing::warn!(session_id = %session_id, "selecting a session that is not in the store");
        }

        self.state.current_session_id = Some(session_id);
        self.publish(StoreEvent::SessionSelected { session_id });
    }

    /// Records a user turn plus an assistant placeholder in the current session.
    ///
    /// Without a current session this only creates one (titled from `content`) and
    /// returns `None`: the turn itself is not recorded on that call.
    pub fn send_message(&mut self, params: SendMessageParams) -> Option<MessageId> {
        let Some(index) = self.current_session_index() else {
            self.open_session_for_first_prompt(&params.content);
            return None;
        };

        let user_message = Message::user(params.content, params.images);
        Some(self.append_exchange_pair(index, user_message))
    }

    /// Same as [`SessionStore::send_message`] for previously sent content, without images.
    pub fn resend_message(&mut self, content: impl Into<String>) {
        let content = content.into();
        let Some(index) = self.current_session_index() else {
            self.open_session_for_first_prompt(&content);
            return;
        };

        self.append_exchange_pair(index, Message::user(content, Vec::new()));
    }

    /// Merges `patch` into the message with `message_id`, wherever it lives.
    ///
    /// Returns false when no session holds the message.
    pub fn update_message(&mut self, message_id: MessageId, patch: MessagePatch) -> bool {
        let Some((session_index, message_index)) = self.locate_message(message_id) else {
            tracing::debug!(message_id = %message_id, "update for unknown message ignored");
            return false;
        };

        if matches!(patch.status, Some(MessageStatus::Streaming)) {
            self.settle_streaming_messages(session_index, Some(message_id));
        }

        let session = &mut self.state.sessions[session_index];
        session.messages[message_index].apply_patch(patch);
        session.touch();

        let session_id = session.id;
        self.publish(StoreEvent::MessageUpdated {
            session_id,
            message_id,
        });
        true
    }

    pub fn edit_message(&mut self, message_id: MessageId, new_content: impl Into<String>) -> bool {
        self.update_message(message_id, MessagePatch::content(new_content))
    }

    pub fn append_to_last_message(&mut self, content: &str) {
        let Some(index) = self.current_session_index() else {
            return;
        };

        let session = &mut self.state.sessions[index];
        let Some(last_message) = session.messages.last_mut() else {
            return;
        };
        if last_message.role != Role::Assistant {
            return;
        }

        last_message.content.push_str(content);
        let message_id = last_message.id;
        session.touch();

        let session_id = session.id;
        self.publish(StoreEvent::MessageUpdated {
            session_id,
            message_id,
        });
    }

    /// Appends an arbitrary message to the current session, creating one when needed.
    pub fn add_message(&mut self, message: Message) {
        let Some(index) = self.current_session_index() else {
            let title = if message.role == Role::User {
                session_title_from(&message.content, self.options.title_max_chars)
            } else {
                self.options.default_session_title.clone()
            };

            let message_id = message.id;
            let mut session = ChatSession::new(title);
            session.messages.push(message);
            let session_id = self.insert_session(session);
            self.publish(StoreEvent::MessageAppended {
                session_id,
                message_id,
            });
            return;
        };

        if message.status.is_streaming() {
            self.settle_streaming_messages(index, None);
        }

        let session = &mut self.state.sessions[index];
        let message_id = message.id;
        session.messages.push(message);
        session.touch();

        let session_id = session.id;
        self.publish(StoreEvent::MessageAppended {
            session_id,
            message_id,
        });
    }

    pub fn clear_current_session(&mut self) {
        let Some(index) = self.current_session_index() else {
            return;
        };

        let session = &mut self.state.sessions[index];
        session.messages.clear();
        session.touch();

        let session_id = session.id;
        self.publish(StoreEvent::SessionCleared { session_id });
    }

    pub fn set_loading(&mut self, loading: bool) {
        if self.state.is_loading == loading {
            return;
        }
        self.state.is_loading = loading;
        self.publish_flags();
    }

    pub fn set_streaming(&mut self, streaming: bool) {
        if self.state.is_streaming == streaming {
            return;
        }
        self.state.is_streaming = streaming;
        self.publish_flags();
    }

    fn insert_session(&mut self, session: ChatSession) -> SessionId {
        let session_id = session.id;
        self.state.sessions.insert(0, session);
        self.state.current_session_id = Some(session_id);

        tracing::debug!(session_id = %session_id, "created session");
        self.publish(StoreEvent::SessionCreated { session_id });
        session_id
    }

    fn open_session_for_first_prompt(&mut self, content: &str) {
        let title = session_title_from(content, self.options.title_max_chars);
        let session_id = self.insert_session(ChatSession::new(title));

        // No placeholder exists in the new session, so only the loading flag is raised.
        tracing::warn!(
            session_id = %session_id,
            "no current session; created one without recording the prompt"
        );
        self.set_loading(true);
    }

    fn append_exchange_pair(&mut self, index: usize, user_message: Message) -> MessageId {
        self.settle_streaming_messages(index, None);

        let assistant_message = Message::assistant_placeholder();
        let user_message_id = user_message.id;
        let assistant_message_id = assistant_message.id;

        let session = &mut self.state.sessions[index];
        session.messages.push(user_message);
        session.messages.push(assistant_message);
        session.touch();
        let session_id = session.id;

        self.publish(StoreEvent::MessageAppended {
            session_id,
            message_id: user_message_id,
        });
        self.publish(StoreEvent::MessageAppended {
            session_id,
            message_id: assistant_message_id,
        });

        self.state.is_loading = true;
        self.state.is_streaming = true;
        self.publish_flags();

        assistant_message_id
    }

    /// Completes any streaming message in the session other than `keep`.
    fn settle_streaming_messages(&mut self, index: usize, keep: Option<MessageId>) {
        let session = &mut self.state.sessions[index];
        let session_id = session.id;
        let mut settled = Vec::new();

        for message in session
            .messages
            .iter_mut()
            .filter(|message| message.status.is_streaming() && Some(message.id) != keep)
        {
            message.status = MessageStatus::Completed;
            settled.push(message.id);
        }

        for message_id in settled {
            tracing::debug!(
                session_id = %session_id,
                message_id = %message_id,
                "settled stale streaming message"
            );
            self.publish(StoreEvent::MessageUpdated {
                session_id,
                message_id,
            });
        }
    }

    fn current_session_index(&self) -> Option<usize> {
        let session_id = self.state.current_session_id?;
        self.state
            .sessions
            .iter()
            .position(|session| session.id == session_id)
    }

    fn locate_message(&self, message_id: MessageId) -> Option<(usize, usize)> {
        self.state
            .sessions
            .iter()
            .enumerate()
            .find_map(|(session_index, session)| {
                session
                    .messages
                    .iter()
                    .position(|message| message.id == message_id)
                    .map(|message_index| (session_index, message_index))
            })
    }

    fn publish_flags(&self) {
        self.publish(StoreEvent::FlagsChanged {
            is_loading: self.state.is_loading,
            is_streaming: self.state.is_streaming,
        });
    }

    fn publish(&self, event: StoreEvent) {
        // No subscribers is the normal case for headless use.
        let _ = self.events.send(event);
    }
}
