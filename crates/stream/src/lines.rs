use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use futures::{Stream, StreamExt};

use super::chunk::{DATA_PREFIX, DONE_SENTINEL};
use super::error::TransportResult;
use super::utf8::Utf8Carry;

/// One complete line of the event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseLine {
    /// Trimmed payload of a `data:` line.
    Data(String),
    /// `data: [DONE]`.
    Done,
    /// Any line without the data marker, blank lines included.
    Other(String),
}

impl SseLine {
    pub fn classify(line: &str) -> Self {
        let line = line.strip_suffix('\r').unwrap_or(line);
        match line.strip_prefix(DATA_PREFIX) {
            Some(payload) => {
                let payload = payload.trim();
                if payload == DONE_SENTINEL {
                    Self::Done
                } else {
                    Self::Data(payload.to_string())
                }
            }
            None => Self::Other(line.to_string()),
        }
    }
}

/// Splits a byte stream into [`SseLine`]s, independent of how the bytes were chunked.
///
/// The byte source is dropped as soon as it is exhausted, fails, or
/// [`LineReader::release`] is called.
pub struct LineReader<S> {
    source: Option<S>,
    carry: Utf8Carry,
    buffer: String,
    ready: VecDeque<SseLine>,
}

impl<S> LineReader<S>
where
    S: Stream<Item = TransportResult<Bytes>> + Unpin,
{
    pub fn new(source: S) -> Self {
        Self {
            source: Some(source),
            carry: Utf8Carry::new(),
            buffer: String::new(),
            ready: VecDeque::new(),
        }
    }

    pub fn is_released(&self) -> bool {
        self.source.is_none()
    }

    /// Drops the byte source and any buffered lines; later polls yield `None`.
    pub fn release(&mut self) {
        self.ready.clear();
        self.buffer.clear();
        self.release_source("consumer-stopped");
    }

    fn release_source(&mut self, reason: &'static str) {
        if self.source.take().is_some() {
            tracing::trace!(reason, "released stream reader");
        }
    }

    fn push_text(&mut self, text: &str) {
        self.buffer.push_str(text);
        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            self.ready
                .push_back(SseLine::classify(line.trim_end_matches('\n')));
        }
    }

    fn flush_remainder(&mut self) {
        let tail = self.carry.finish();
        self.buffer.push_str(&tail);

        let remainder = std::mem::take(&mut self.buffer);
        if !remainder.trim().is_empty() {
            self.ready.push_back(SseLine::classify(&remainder));
        }
    }
}

impl<S> Stream for LineReader<S>
where
    S: Stream<Item = TransportResult<Bytes>> + Unpin,
{
    type Item = TransportResult<SseLine>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(line) = this.ready.pop_front() {
                return Poll::Ready(Some(Ok(line)));
            }

            let Some(source) = this.source.as_mut() else {
                return Poll::Ready(None);
            };

            match ready!(source.poll_next_unpin(cx)) {
                Some(Ok(bytes)) => {
                    let text = this.carry.decode(&bytes);
                    this.push_text(&text);
                }
                Some(Err(error)) => {
                    this.release_source("transport-error");
                    return Poll::Ready(Some(Err(error)));
                }
                None => {
                    this.release_source("end-of-input");
                    this.flush_remainder();
                }
            }
        }
    }
}

/// Transport-agnostic line reader: data payloads and other non-blank lines as
/// plain text, ending at the `[DONE]` sentinel.
pub struct RawLines<S> {
    lines: LineReader<S>,
}

pub fn raw_lines<S>(source: S) -> RawLines<S>
where
    S: Stream<Item = TransportResult<Bytes>> + Unpin,
{
    RawLines {
        lines: LineReader::new(source),
    }
}

impl<S> Stream for RawLines<S>
where
    S: Stream<Item = TransportResult<Bytes>> + Unpin,
{
    type Item = TransportResult<String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            match ready!(this.lines.poll_next_unpin(cx)) {
                Some(Ok(SseLine::Data(payload))) => return Poll::Ready(Some(Ok(payload))),
                Some(Ok(SseLine::Other(line))) if !line.trim().is_empty() => {
                    return Poll::Ready(Some(Ok(line)));
                }
                Some(Ok(SseLine::Other(_))) => continue,
                Some(Ok(SseLine::Done)) => {
                    this.lines.release();
                    return Poll::Ready(None);
                }
                Some(Err(error)) => return Poll::Ready(Some(Err(error))),
                None => return Poll::Ready(None),
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use futures::stream;

    use super::*;
    use crate::error::TransportError;

    /// Byte source that records when it is dropped.
    pub(crate) struct TrackedSource<S> {
        inner: S,
        dropped: Arc<AtomicBool>,
    }

    impl<S> TrackedSource<S> {
        pub(crate) fn new(inner: S) -> (Self, Arc<AtomicBool>) {
            let dropped = Arc::new(AtomicBool::new(false));
            (
                Self {
                    inner,
                    dropped: dropped.clone(),
                },
                dropped,
            )
        }
    }

    impl<S> Stream for TrackedSource<S>
    where
        S: Stream<Item = TransportResult<Bytes>> + Unpin,
    {
        type Item = TransportResult<Bytes>;

        fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            self.get_mut().inner.poll_next_unpin(cx)
        }
    }

    impl<S> Drop for TrackedSource<S> {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    pub(crate) fn byte_chunks(
        parts: &[&[u8]],
    ) -> stream::Iter<std::vec::IntoIter<TransportResult<Bytes>>> {
        let chunks = parts
            .iter()
            .map(|part| Ok(Bytes::copy_from_slice(part)))
            .collect::<Vec<_>>();
        stream::iter(chunks)
    }

    #[test]
    fn classifies_lines() {
        assert_eq!(
            SseLine::classify("data:  {\"a\":1}  "),
            SseLine::Data("{\"a\":1}".to_string())
        );
        assert_eq!(SseLine::classify("data: [DONE]\r"), SseLine::Done);
        assert_eq!(
            SseLine::classify(": keep-alive"),
            SseLine::Other(": keep-alive".to_string())
        );
    }

    #[tokio::test]
    async fn incomplete_line_is_carried_to_the_next_read() {
        let source = byte_chunks(&[b"data: one\nda", b"ta: two", b"\n"]);
        let lines = LineReader::new(source)
            .map(|line| line.expect("no transport errors"))
            .collect::<Vec<_>>()
            .await;

        assert_eq!(
            lines,
            vec![
                SseLine::Data("one".to_string()),
                SseLine::Data("two".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn remainder_is_flushed_at_end_of_input() {
        let source = byte_chunks(&[b"chunk 1\n", b"chunk 2"]);
        let lines = raw_lines(source)
            .map(|line| line.expect("no transport errors"))
            .collect::<Vec<_>>()
            .await;

        assert_eq!(lines, vec!["chunk 1".to_string(), "chunk 2".to_string()]);
    }

    #[tokio::test]
    async fn raw_lines_skip_blanks_and_stop_at_sentinel() {
        let source = byte_chunks(&[b"chunk 1\n\ndata: payload\ndata: [DONE]\nafter\n"]);
        let lines = raw_lines(source)
            .map(|line| line.expect("no transport errors"))
            .collect::<Vec<_>>()
            .await;

        assert_eq!(lines, vec!["chunk 1".to_string(), "payload".to_string()]);
    }

    #[tokio::test]
    async fn source_is_released_at_sentinel() {
        let pending_forever = stream::iter(vec![Ok::<_, TransportError>(Bytes::from_static(
            b"data: [DONE]\n",
        ))])
        .chain(stream::pending());
        let (source, dropped) = TrackedSource::new(Box::pin(pending_forever));

        let mut lines = raw_lines(source);
        assert!(lines.next().await.is_none());
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn transport_error_is_reported_once() {
        let source = stream::iter(vec![
            Ok(Bytes::from_static(b"data: a\n")),
            Err(TransportError::Stream {
                stage: "test",
                message: "connection reset".to_string(),
            }),
            Ok(Bytes::from_static(b"data: b\n")),
        ]);
        let mut lines = LineReader::new(source);

        assert_eq!(
            lines.next().await.map(|line| line.ok()),
            Some(Some(SseLine::Data("a".to_string())))
        );
        assert!(matches!(lines.next().await, Some(Err(_))));
        assert!(lines.is_released());
        assert!(lines.next().await.is_none());
    }
}
