//! In-memory session store for chatline.
//!
//! The store is the single source of truth for sessions and messages. All
//! mutations are synchronous and publish a [`StoreEvent`] to subscribers.
pub mod error;
pub mod events;
pub mod ids;
pub mod store;
pub mod types;

pub use error::{StorageError, StorageResult};
pub use events::StoreEvent;
pub use ids::{MessageId, SessionId};
pub use store::{STORE_EVENT_CAPACITY, SessionStore, SharedStore, StoreOptions};
pub use types::{
    ChatSession, ChatState, DEFAULT_SESSION_TITLE, Message, MessagePatch, MessageStatus, Role,
    SESSION_TITLE_MAX_CHARS, SendMessageParams, session_title_from, unix_timestamp_millis,
};
