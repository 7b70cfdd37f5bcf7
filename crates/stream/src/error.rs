use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TransportError {
    #[snafu(display("failed to build http client on `{stage}`: {source}"))]
    BuildClient {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("request to {url} failed on `{stage}`: {source}"))]
    Http {
        stage: &'static str,
        url: String,
        source: reqwest::Error,
    },
    #[snafu(display("HTTP error! status: {status}"))]
    Status { stage: &'static str, status: u16 },
    #[snafu(display("Response body is null"))]
    MissingBody { stage: &'static str },
    #[snafu(display("failed to read response body on `{stage}`: {source}"))]
    Body {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("transport stream failed on `{stage}`: {message}"))]
    Stream {
        stage: &'static str,
        message: String,
    },
    /// The request was torn down on purpose; never shown to the user.
    #[snafu(display("request cancelled on `{stage}`"))]
    Cancelled { stage: &'static str },
}

impl TransportError {
    /// Connection-level failures are worth another attempt; HTTP answers are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { source, .. } => source.is_connect() || source.is_timeout(),
            Self::BuildClient { .. }
            | Self::Status { .. }
            | Self::MissingBody { .. }
            | Self::Body { .. }
            | Self::Stream { .. }
            | Self::Cancelled { .. } => false,
        }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

pub type TransportResult<T> = Result<T, TransportError>;

/// A `data:` payload that is not a valid chunk record.
///
/// Never surfaces past the decoder, which substitutes a plain-content chunk.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum DecodeError {
    #[snafu(display("payload is not a stream chunk on `{stage}`: {source}"))]
    Json {
        stage: &'static str,
        source: serde_json::Error,
    },
}
