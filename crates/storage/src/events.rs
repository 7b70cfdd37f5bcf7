use super::ids::{MessageId, SessionId};

/// Change notification published after every store mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    SessionCreated { session_id: SessionId },
    SessionDeleted { session_id: SessionId },
    SessionSelected { session_id: SessionId },
    SessionCleared { session_id: SessionId },
    MessageAppended {
        session_id: SessionId,
        message_id: MessageId,
    },
    MessageUpdated {
        session_id: SessionId,
        message_id: MessageId,
    },
    FlagsChanged { is_loading: bool, is_streaming: bool },
}

impl StoreEvent {
    /// Session touched by this change, if any.
    pub fn session_id(&self) -> Option<SessionId> {
        match self {
            Self::SessionCreated { session_id }
            | Self::SessionDeleted { session_id }
            | Self::SessionSelected { session_id }
            | Self::SessionCleared { session_id }
            | Self::MessageAppended { session_id, .. }
            | Self::MessageUpdated { session_id, .. } => Some(*session_id),
            Self::FlagsChanged { .. } => None,
        }
    }
}
