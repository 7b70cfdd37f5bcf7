use chatline_stream::TransportError;
use snafu::Snafu;

use crate::settings::SettingsError;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ChatError {
    #[snafu(display("message has no text and no images"))]
    EmptyMessage { stage: &'static str },
    #[snafu(display("{source}"))]
    Transport {
        stage: &'static str,
        source: TransportError,
    },
    #[snafu(display("exchange cancelled on `{stage}`"))]
    Cancelled { stage: &'static str },
    #[snafu(display("{message}"))]
    UnknownStream {
        stage: &'static str,
        message: String,
    },
    #[snafu(display("failed to apply settings on `{stage}`: {source}"))]
    Settings {
        stage: &'static str,
        source: SettingsError,
    },
}

impl ChatError {
    /// Cancellation ends an exchange quietly; it is never stored as a message error.
    pub fn is_cancellation(&self) -> bool {
        match self {
            Self::Cancelled { .. } => true,
            Self::Transport { source, .. } => source.is_cancellation(),
            Self::EmptyMessage { .. } | Self::UnknownStream { .. } | Self::Settings { .. } => {
                false
            }
        }
    }
}

pub type ChatResult<T> = Result<T, ChatError>;
