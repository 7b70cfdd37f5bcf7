use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use futures::{Stream, StreamExt};

use super::chunk::StreamChunk;
use super::error::TransportResult;
use super::lines::{LineReader, SseLine};

/// Why an [`EventDecoder`] stopped yielding chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Sentinel,
    EndOfInput,
    TransportFailed,
}

/// Lazily decodes a byte stream into [`StreamChunk`]s.
///
/// Only `data:` lines carry events. A payload that is not a chunk record is
/// delivered as plain content rather than dropped.
pub struct EventDecoder<S> {
    lines: LineReader<S>,
    finish_reason: Option<FinishReason>,
}

impl<S> EventDecoder<S>
where
    S: Stream<Item = TransportResult<Bytes>> + Unpin,
{
    pub fn new(source: S) -> Self {
        Self {
            lines: LineReader::new(source),
            finish_reason: None,
        }
    }

    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.finish_reason
    }

    pub fn is_released(&self) -> bool {
        self.lines.is_released()
    }

    fn finish(&mut self, reason: FinishReason) {
        self.finish_reason = Some(reason);
        self.lines.release();
    }
}

fn decode_payload(payload: String) -> StreamChunk {
    match StreamChunk::parse(&payload) {
        Ok(chunk) => chunk,
        Err(error) => {
            tracing::debug!(error = %error, "payload is not a chunk record; using it as content");
            StreamChunk::fallback(payload)
        }
    }
}

impl<S> Stream for EventDecoder<S>
where
    S: Stream<Item = TransportResult<Bytes>> + Unpin,
{
    type Item = TransportResult<StreamChunk>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finish_reason.is_some() {
            return Poll::Ready(None);
        }

        loop {
            match ready!(this.lines.poll_next_unpin(cx)) {
                Some(Ok(SseLine::Data(payload))) => {
                    return Poll::Ready(Some(Ok(decode_payload(payload))));
                }
                Some(Ok(SseLine::Other(_))) => continue,
                Some(Ok(SseLine::Done)) => {
                    this.finish(FinishReason::Sentinel);
                    return Poll::Ready(None);
                }
                Some(Err(error)) => {
                    this.finish(FinishReason::TransportFailed);
                    return Poll::Ready(Some(Err(error)));
                }
                None => {
                    this.finish(FinishReason::EndOfInput);
                    return Poll::Ready(None);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use futures::stream;

    use super::*;
    use crate::chunk::ChunkType;
    use crate::error::TransportError;
    use crate::lines::tests::{TrackedSource, byte_chunks};

    const HELLO_STREAM: &str = concat!(
        "data: {\"id\":\"m1\",\"content\":\"Hello\",\"done\":false}\n",
        "data: {\"id\":\"m1\",\"content\":\"\",\"done\":true}\n",
        "data: [DONE]\n",
    );

    async fn decode_all<S>(decoder: &mut EventDecoder<S>) -> Vec<StreamChunk>
    where
        S: Stream<Item = TransportResult<Bytes>> + Unpin,
    {
        let mut chunks = Vec::new();
        while let Some(chunk) = decoder.next().await {
            chunks.push(chunk.expect("no transport errors"));
        }
        chunks
    }

    #[tokio::test]
    async fn decodes_records_until_sentinel() {
        let mut decoder = EventDecoder::new(byte_chunks(&[HELLO_STREAM.as_bytes()]));
        let chunks = decode_all(&mut decoder).await;

        assert_eq!(
            chunks,
            vec![
                StreamChunk::text("m1", "Hello", false),
                StreamChunk::text("m1", "", true),
            ]
        );
        assert_eq!(decoder.finish_reason(), Some(FinishReason::Sentinel));
        assert!(decoder.is_released());
    }

    #[tokio::test]
    async fn output_does_not_depend_on_chunk_boundaries() {
        let bytes = HELLO_STREAM.as_bytes();
        let mut whole = EventDecoder::new(byte_chunks(&[bytes]));
        let expected = decode_all(&mut whole).await;

        for split in 1..bytes.len() {
            let mut decoder = EventDecoder::new(byte_chunks(&[&bytes[..split], &bytes[split..]]));
            assert_eq!(decode_all(&mut decoder).await, expected, "split at {split}");
        }

        let single_bytes = bytes.chunks(1).collect::<Vec<_>>();
        let mut decoder = EventDecoder::new(byte_chunks(&single_bytes));
        assert_eq!(decode_all(&mut decoder).await, expected);
    }

    #[tokio::test]
    async fn malformed_payload_falls_back_to_content() {
        let source = byte_chunks(&[b"data: not json at all\ndata: {\"id\":\n"]);
        let mut decoder = EventDecoder::new(source);
        let chunks = decode_all(&mut decoder).await;

        assert_eq!(
            chunks,
            vec![
                StreamChunk::fallback("not json at all"),
                StreamChunk::fallback("{\"id\":"),
            ]
        );
        assert_eq!(decoder.finish_reason(), Some(FinishReason::EndOfInput));
    }

    #[tokio::test]
    async fn non_data_lines_are_ignored() {
        let source = byte_chunks(&[b": ping\nevent: message\ndata: {\"content\":\"x\"}\n\n"]);
        let mut decoder = EventDecoder::new(source);
        assert_eq!(
            decode_all(&mut decoder).await,
            vec![StreamChunk::text("", "x", false)]
        );
    }

    #[tokio::test]
    async fn unterminated_last_line_is_still_decoded() {
        let source = byte_chunks(&[b"data: {\"id\":\"m1\",\"content\":\"tail\",\"done\":true}"]);
        let mut decoder = EventDecoder::new(source);
        assert_eq!(
            decode_all(&mut decoder).await,
            vec![StreamChunk::text("m1", "tail", true)]
        );
        assert_eq!(decoder.finish_reason(), Some(FinishReason::EndOfInput));
    }

    #[tokio::test]
    async fn image_records_keep_their_type() {
        let source = byte_chunks(&[
            b"data: {\"id\":\"m1\",\"content\":\"\",\"done\":false,\"type\":\"image\",\"images\":[\"a.png\"]}\n",
        ]);
        let mut decoder = EventDecoder::new(source);
        let chunks = decode_all(&mut decoder).await;
        assert_eq!(chunks[0].kind, Some(ChunkType::Image));
        assert_eq!(chunks[0].images, Some(vec!["a.png".to_string()]));
    }

    #[tokio::test]
    async fn sentinel_releases_source_even_if_more_bytes_would_follow() {
        let source = stream::iter(vec![Ok::<_, TransportError>(Bytes::from_static(
            b"data: {\"content\":\"a\"}\ndata: [DONE]\ndata: {\"content\":\"b\"}\n",
        ))])
        .chain(stream::pending());
        let (source, dropped) = TrackedSource::new(Box::pin(source));

        let mut decoder = EventDecoder::new(source);
        assert_eq!(
            decode_all(&mut decoder).await,
            vec![StreamChunk::text("", "a", false)]
        );
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn dropping_the_decoder_releases_the_source() {
        let source = stream::iter(vec![Ok::<_, TransportError>(Bytes::from_static(
            b"data: {\"content\":\"a\"}\n",
        ))])
        .chain(stream::pending());
        let (source, dropped) = TrackedSource::new(Box::pin(source));

        let mut decoder = EventDecoder::new(source);
        assert!(decoder.next().await.is_some());
        assert!(!dropped.load(Ordering::SeqCst));

        drop(decoder);
        assert!(dropped.load(Ordering::SeqCst));
    }
}
