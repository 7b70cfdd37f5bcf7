//! Stream decoding and transport for chatline.
//!
//! Bytes arrive from a [`Transport`] in arbitrary chunks; [`LineReader`] turns
//! them into lines, and [`EventDecoder`] turns `data:` lines into
//! [`StreamChunk`]s until the `[DONE]` sentinel.
mod chunk;
mod decoder;
mod error;
mod http;
mod lines;
mod transport;
mod utf8;

pub use chunk::{ChatRequest, ChunkType, DATA_PREFIX, DONE_SENTINEL, StreamChunk};
pub use decoder::{EventDecoder, FinishReason};
pub use error::{DecodeError, TransportError, TransportResult};
pub use http::{EVENT_STREAM_CONTENT_TYPE, HttpTransport, HttpTransportConfig, RetryPolicy};
pub use lines::{LineReader, RawLines, SseLine, raw_lines};
pub use transport::{BoxFuture, ByteStream, Transport, TransportResponse};
pub use utf8::Utf8Carry;
