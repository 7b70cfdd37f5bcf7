use std::collections::HashMap;
use std::sync::Arc;

use chatline_storage::{
    Message, MessageId, MessageStatus, Role, SendMessageParams, SessionId, SessionStore,
    SharedStore,
};
use chatline_stream::{HttpTransport, Transport};
use snafu::ResultExt;
use tokio::task::JoinHandle;

use crate::chat::{
    ChatController, ChatError, ChatResult, ExchangeOutcome, SettingsSnafu, TransportSnafu,
};
use crate::settings::SettingsStore;

/// One line of terminal input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Prompt(String),
    NewSession,
    Abort,
    Regenerate,
    Resend,
    Edit(String),
    Clear,
    Sessions,
    Quit,
    Unknown(String),
}

impl Command {
    /// Parses a line; blank input yields `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let Some(command) = line.strip_prefix('/') else {
            return Some(Self::Prompt(line.to_string()));
        };

        let (name, argument) = match command.split_once(char::is_whitespace) {
            Some((name, argument)) => (name, argument.trim()),
            None => (command, ""),
        };

        let parsed = match name {
            "new" => Self::NewSession,
            "abort" | "stop" => Self::Abort,
            "regen" | "regenerate" => Self::Regenerate,
            "resend" => Self::Resend,
            "edit" if !argument.is_empty() => Self::Edit(argument.to_string()),
            "clear" => Self::Clear,
            "sessions" => Self::Sessions,
            "quit" | "exit" => Self::Quit,
            _ => Self::Unknown(line.to_string()),
        };
        Some(parsed)
    }
}

/// Wires settings, the session store and the controller together.
pub struct ChatApp {
    settings: SettingsStore,
    controller: Arc<ChatController>,
}

impl ChatApp {
    /// Loads settings from the default location and connects over HTTP.
    pub fn load() -> ChatResult<Self> {
        let settings = SettingsStore::load();
        if settings.ensure_file().context(SettingsSnafu {
            stage: "write-default-settings",
        })? {
            tracing::info!(path = ?settings.config_path(), "wrote default settings");
        }

        Self::new(settings)
    }

    pub fn new(settings: SettingsStore) -> ChatResult<Self> {
        let current = settings.settings();
        let transport =
            HttpTransport::new(current.transport_config()).context(TransportSnafu {
                stage: "build-http-transport",
            })?;
        tracing::info!(endpoint = %transport.endpoint(), "chat transport ready");

        let store = SessionStore::with_options(current.store_options()).shared();
        Ok(Self::with_transport(settings, store, Arc::new(transport)))
    }

    pub fn with_transport(
        settings: SettingsStore,
        store: SharedStore,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            settings,
            controller: Arc::new(ChatController::new(store, transport)),
        }
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn controller(&self) -> &Arc<ChatController> {
        &self.controller
    }

    pub fn store(&self) -> &SharedStore {
        self.controller.store()
    }

    pub fn new_session(&self) -> SessionId {
        self.store().lock().create_session(None)
    }

    /// Runs `command`.
    ///
    /// Commands that start an exchange are spawned so input stays responsive while
    /// the reply streams; the handle resolves with the exchange outcome.
    pub fn execute(&self, command: Command) -> Option<JoinHandle<ChatResult<ExchangeOutcome>>> {
        match command {
            Command::Prompt(content) => {
                Some(self.spawn_exchange(Intent::Send(SendMessageParams::new(content))))
            }
            Command::Edit(content) => match self.last_message_id(Role::User) {
                Some(message_id) => Some(self.spawn_exchange(Intent::Edit(message_id, content))),
                None => {
                    tracing::warn!("no user message to edit");
                    None
                }
            },
            Command::Resend => {
                let content = self.last_user_content();
                match content {
                    Some(content) => Some(self.spawn_exchange(Intent::Resend(content))),
                    None => {
                        tracing::warn!("no user message to resend");
                        None
                    }
                }
            }
            Command::Regenerate => match self.last_message_id(Role::Assistant) {
                Some(message_id) => Some(self.spawn_exchange(Intent::Regenerate(message_id))),
                None => {
                    tracing::warn!("no assistant message to regenerate");
                    None
                }
            },
            Command::Abort => {
                self.controller.abort_streaming();
                None
            }
            Command::NewSession => {
                if self.controller.is_in_flight() {
                    self.controller.abort_streaming();
                }
                self.new_session();
                None
            }
            Command::Clear => {
                self.store().lock().clear_current_session();
                None
            }
            Command::Sessions | Command::Quit => None,
            Command::Unknown(line) => {
                tracing::warn!(command = %line, "unknown command");
                None
            }
        }
    }

    /// One line per session, current session marked with `*`.
    pub fn session_overview(&self) -> Vec<String> {
        let store = self.store().lock();
        let current = store.current_session_id();
        store
            .sessions()
            .iter()
            .map(|session| {
                let marker = if Some(session.id) == current { '*' } else { ' ' };
                format!(
                    "{marker} {} ({} messages)",
                    session.title,
                    session.messages.len()
                )
            })
            .collect()
    }

    fn last_message_id(&self, role: Role) -> Option<MessageId> {
        let store = self.store().lock();
        store.current_session().and_then(|session| {
            session
                .messages
                .iter()
                .rev()
                .find(|message| message.role == role)
                .map(|message| message.id)
        })
    }

    fn last_user_content(&self) -> Option<String> {
        let store = self.store().lock();
        store.current_session().and_then(|session| {
            session
                .messages
                .iter()
                .rev()
                .find(|message| message.role == Role::User)
                .map(|message| message.content.clone())
        })
    }

    fn spawn_exchange(&self, intent: Intent) -> JoinHandle<ChatResult<ExchangeOutcome>> {
        let controller = Arc::clone(&self.controller);
        tokio::spawn(async move {
            let result = match intent {
                Intent::Send(params) => controller.send_message(params).await,
                Intent::Edit(message_id, content) => {
                    controller.edit_message(message_id, content).await
                }
                Intent::Resend(content) => controller.resend_message(content).await,
                Intent::Regenerate(message_id) => {
                    Ok(controller.regenerate_message(message_id).await)
                }
            };
            report(&result);
            result
        })
    }
}

enum Intent {
    Send(SendMessageParams),
    Edit(MessageId, String),
    Resend(String),
    Regenerate(MessageId),
}

fn report(result: &Result<ExchangeOutcome, ChatError>) {
    match result {
        Ok(ExchangeOutcome::Rejected(reason)) => {
            tracing::warn!(?reason, "request ignored; a reply may still be streaming (use /abort)");
        }
        Ok(outcome) => tracing::debug!(?outcome, "exchange finished"),
        Err(error) => tracing::warn!(error = %error, "request not sent"),
    }
}

/// Turns assistant message updates into terminal output.
///
/// Tracks how much of each message was already written so streamed content is
/// printed once, as it grows.
#[derive(Debug, Default)]
pub struct TranscriptPrinter {
    printed: HashMap<MessageId, usize>,
}

impl TranscriptPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text to write for the latest state of `message`, if any.
    pub fn render(&mut self, message: &Message) -> Option<String> {
        if message.role != Role::Assistant {
            return None;
        }

        let printed = self.printed.entry(message.id).or_insert(0);
        if *printed > message.content.len() || !message.content.is_char_boundary(*printed) {
            *printed = 0;
        }

        let mut output = message.content[*printed..].to_string();
        *printed = message.content.len();

        match &message.status {
            MessageStatus::Pending | MessageStatus::Streaming => {}
            MessageStatus::Completed => {
                if !message.images.is_empty() {
                    output.push_str(&format!("\n[images: {}]", message.images.join(", ")));
                }
                output.push('\n');
                self.printed.remove(&message.id);
            }
            MessageStatus::Error(cause) => {
                output.push_str(&format!("\n[error: {cause}]\n"));
                self.printed.remove(&message.id);
            }
        }

        (!output.is_empty()).then_some(output)
    }
}
