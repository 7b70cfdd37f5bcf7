//! Streamed chat client core.
//!
//! [`ChatController`] turns user intents into exchanges over a
//! [`chatline_stream::Transport`] and folds the streamed reply into a shared
//! [`chatline_storage::SessionStore`].
pub mod app;
pub mod chat;
pub mod settings;

pub use app::{ChatApp, Command, TranscriptPrinter};
pub use chat::{
    ChatController, ChatError, ChatResult, ExchangeId, ExchangeOutcome, ExchangeState,
    RejectReason,
};
pub use settings::{ClientSettings, SettingsError, SettingsStore};
