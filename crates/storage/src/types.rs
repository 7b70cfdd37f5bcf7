use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use super::ids::{MessageId, SessionId};

/// Title given to sessions created without one.
pub const DEFAULT_SESSION_TITLE: &str = "New Chat";

/// Number of characters of the first prompt kept when deriving a session title.
pub const SESSION_TITLE_MAX_CHARS: usize = 30;

/// Chat speaker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// Lifecycle status for one message.
///
/// The error text lives inside the `Error` variant, so a message can only carry
/// an error while it is in the error state.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    #[default]
    Pending,
    Streaming,
    Completed,
    Error(String),
}

impl MessageStatus {
    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub images: Vec<String>,
    pub timestamp: u64,
    pub status: MessageStatus,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>, status: MessageStatus) -> Self {
        Self {
            id: MessageId::generate(),
            role,
            content: content.into(),
            images: Vec::new(),
            timestamp: unix_timestamp_millis(),
            status,
        }
    }

    /// A user turn is complete the moment it is recorded.
    pub fn user(content: impl Into<String>, images: Vec<String>) -> Self {
        let mut message = Self::new(Role::User, content, MessageStatus::Completed);
        message.images = images;
        message
    }

    /// Empty assistant message that the controller fills while streaming.
    pub fn assistant_placeholder() -> Self {
        Self::new(Role::Assistant, String::new(), MessageStatus::Streaming)
    }

    pub fn error(&self) -> Option<&str> {
        match &self.status {
            MessageStatus::Error(message) => Some(message.as_str()),
            MessageStatus::Pending | MessageStatus::Streaming | MessageStatus::Completed => None,
        }
    }

    pub(crate) fn apply_patch(&mut self, patch: MessagePatch) {
        if let Some(content) = patch.content {
            self.content = content;
        }
        if let Some(images) = patch.images {
            self.images = images;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
    }
}

/// Partial update merged into an existing message. `None` keeps the current value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MessagePatch {
    pub content: Option<String>,
    pub images: Option<Vec<String>>,
    pub status: Option<MessageStatus>,
}

impl MessagePatch {
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn status(status: MessageStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: MessageStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.images = Some(images);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_none() && self.images.is_none() && self.status.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: SessionId,
    pub title: String,
    pub messages: Vec<Message>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl ChatSession {
    pub fn new(title: impl Into<String>) -> Self {
        let now = unix_timestamp_millis();
        Self {
            id: SessionId::generate(),
            title: title.into(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn message(&self, message_id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|message| message.id == message_id)
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn last_assistant_message(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == Role::Assistant)
    }

    pub fn streaming_message(&self) -> Option<&Message> {
        self.messages
            .iter()
            .find(|message| message.status.is_streaming())
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = unix_timestamp_millis();
    }
}

/// Complete in-memory chat state. Sessions are ordered newest first.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChatState {
    pub sessions: Vec<ChatSession>,
    pub current_session_id: Option<SessionId>,
    pub is_loading: bool,
    pub is_streaming: bool,
}

impl ChatState {
    pub fn session(&self, session_id: SessionId) -> Option<&ChatSession> {
        self.sessions.iter().find(|session| session.id == session_id)
    }

    pub fn current_session(&self) -> Option<&ChatSession> {
        self.current_session_id
            .and_then(|session_id| self.session(session_id))
    }
}

/// User input for one exchange.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SendMessageParams {
    pub content: String,
    pub images: Vec<String>,
}

impl SendMessageParams {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.images = images;
        self
    }

    /// True when there is neither text nor an attachment to send.
    pub fn is_blank(&self) -> bool {
        self.content.trim().is_empty() && self.images.is_empty()
    }
}

/// Derives a session title from the first prompt, marking truncation with `...`.
pub fn session_title_from(content: &str, max_chars: usize) -> String {
    let mut title: String = content.chars().take(max_chars).collect();
    if content.chars().count() > max_chars {
        title.push_str("...");
    }
    title
}

pub fn unix_timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_prompts_are_truncated_with_ellipsis() {
        let prompt = "a".repeat(31);
        let title = session_title_from(&prompt, SESSION_TITLE_MAX_CHARS);
        assert_eq!(title, format!("{}...", "a".repeat(30)));
    }

    #[test]
    fn short_prompts_keep_their_text() {
        assert_eq!(session_title_from("hello", SESSION_TITLE_MAX_CHARS), "hello");
        let exact = "b".repeat(30);
        assert_eq!(session_title_from(&exact, SESSION_TITLE_MAX_CHARS), exact);
    }

    #[test]
    fn truncation_counts_characters_not_bytes() {
        let prompt = "你好".repeat(20);
        let title = session_title_from(&prompt, SESSION_TITLE_MAX_CHARS);
        assert_eq!(title.chars().count(), 33);
        assert!(title.ends_with("..."));
    }

    #[test]
    fn error_text_is_only_visible_in_error_status() {
        let mut message = Message::assistant_placeholder();
        assert_eq!(message.error(), None);

        message.apply_patch(MessagePatch::status(MessageStatus::Error(
            "HTTP error! status: 500".to_string(),
        )));
        assert_eq!(message.error(), Some("HTTP error! status: 500"));

        message.apply_patch(MessagePatch::status(MessageStatus::Completed));
        assert_eq!(message.error(), None);
    }

    #[test]
    fn blank_params_require_text_or_images() {
        assert!(SendMessageParams::new("   ").is_blank());
        assert!(!SendMessageParams::new("  ").with_images(vec!["a.png".into()]).is_blank());
        assert!(!SendMessageParams::new("hi").is_blank());
    }
}
