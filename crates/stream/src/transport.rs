use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;
use snafu::{OptionExt, ensure};

use super::chunk::ChatRequest;
use super::error::{MissingBodySnafu, StatusSnafu, TransportResult};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Response body as delivered by the network, in arbitrary chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = TransportResult<Bytes>> + Send + 'static>>;

/// Status line plus the body, when the server sent one.
pub struct TransportResponse {
    pub status: u16,
    pub body: Option<ByteStream>,
}

impl TransportResponse {
    pub fn new(status: u16, body: Option<ByteStream>) -> Self {
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Hands out the body of a successful response.
    pub fn into_body(self) -> TransportResult<ByteStream> {
        ensure!(
            self.is_success(),
            StatusSnafu {
                stage: "check-response-status",
                status: self.status,
            }
        );

        self.body.context(MissingBodySnafu {
            stage: "take-response-body",
        })
    }
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("has_body", &self.body.is_some())
            .finish()
    }
}

/// Sends one chat request and exposes the streamed reply.
///
/// Dropping the returned future or body stream cancels the request.
pub trait Transport: Send + Sync {
    fn open<'a>(&'a self, request: ChatRequest) -> BoxFuture<'a, TransportResult<TransportResponse>>;
}
