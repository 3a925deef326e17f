//! Incremental parser for `text/event-stream` bodies.
//!
//! Used both for vendor streaming APIs and for reading our own push stream
//! back on the client side.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use log::warn;
use memchr::{memchr, memmem};
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use crate::error::GenerationError;
use crate::providers::FragmentStream;

const MAX_BUFFERED_BYTES: usize = 1_000_000;

/// One parsed server-sent event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Adapter turning a byte stream into [`SseEvent`]s.
///
/// An event whose bytes are not UTF-8 is reported as
/// [`GenerationError::MalformedFragment`] and parsing continues with the next
/// event. Bytes left over when the body ends that do not form an event are
/// reported as [`GenerationError::Transport`].
pub struct SseStream<S> {
    inner: S,
    buffer: Vec<u8>,
    pending: VecDeque<Result<SseEvent, GenerationError>>,
    finished: bool,
}

impl<S> SseStream<S> {
    pub fn new(inner: S) -> Self {
        SseStream {
            inner,
            buffer: Vec::new(),
            pending: VecDeque::new(),
            finished: false,
        }
    }

    fn drain_events(&mut self) {
        normalize_line_endings(&mut self.buffer);

        let finder = memmem::Finder::new(b"\n\n");
        let mut start = 0;
        while let Some(pos) = finder.find(&self.buffer[start..]) {
            let end = start + pos;
            match std::str::from_utf8(&self.buffer[start..end]) {
                Ok(block) => {
                    if let Some(event) = parse_block(block) {
                        self.pending.push_back(Ok(event));
                    }
                }
                Err(e) => self
                    .pending
                    .push_back(Err(GenerationError::MalformedFragment(format!(
                        "event is not valid UTF-8: {}",
                        e
                    )))),
            }
            start = end + 2;
        }

        if start > 0 {
            self.buffer.drain(..start);
        }
    }

    fn finish(&mut self) {
        self.finished = true;
        if let Some(last) = self.buffer.last_mut() {
            if *last == b'\r' {
                *last = b'\n';
            }
        }
        if self.buffer.iter().all(|b| b.is_ascii_whitespace()) {
            self.buffer.clear();
            return;
        }

        let tail = std::mem::take(&mut self.buffer);
        match std::str::from_utf8(&tail) {
            Ok(block) => {
                if let Some(event) = parse_block(block) {
                    self.pending.push_back(Ok(event));
                }
            }
            Err(_) => self.pending.push_back(Err(GenerationError::transport(
                "stream ended inside an undecodable event",
            ))),
        }
    }
}

/// Rewrite `\r\n` and lone `\r` line endings as `\n`.
///
/// A trailing `\r` is left alone until the next chunk shows whether a `\n`
/// follows it.
fn normalize_line_endings(buffer: &mut Vec<u8>) {
    if memchr(b'\r', buffer).is_none() {
        return;
    }

    let mut normalized = Vec::with_capacity(buffer.len());
    let mut bytes = buffer.iter().copied().peekable();
    while let Some(byte) = bytes.next() {
        if byte != b'\r' {
            normalized.push(byte);
            continue;
        }
        match bytes.peek() {
            Some(b'\n') => {}
            Some(_) => normalized.push(b'\n'),
            None => normalized.push(b'\r'),
        }
    }
    *buffer = normalized;
}

/// Parse the lines of one event block; `None` when it carries no data
fn parse_block(block: &str) -> Option<SseEvent> {
    let mut event = None;
    let mut data: Vec<&str> = Vec::new();

    for line in block.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "event" => event = Some(value.to_string()),
            "data" => data.push(value),
            _ => {}
        }
    }

    if data.is_empty() {
        return None;
    }

    Some(SseEvent {
        event,
        data: data.join("\n"),
    })
}

impl<S, E> Stream for SseStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    type Item = Result<SseEvent, GenerationError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                return Poll::Ready(Some(item));
            }
            if self.finished {
                return Poll::Ready(None);
            }

            match ready!(self.inner.poll_next_unpin(cx)) {
                Some(Ok(chunk)) => {
                    self.buffer.extend_from_slice(&chunk);
                    if self.buffer.len() > MAX_BUFFERED_BYTES {
                        self.buffer.clear();
                        self.finished = true;
                        return Poll::Ready(Some(Err(GenerationError::transport(
                            "event exceeded the maximum buffered size",
                        ))));
                    }
                    self.drain_events();
                }
                Some(Err(e)) => {
                    self.finished = true;
                    return Poll::Ready(Some(Err(GenerationError::transport(format!(
                        "stream aborted: {}",
                        e
                    )))));
                }
                None => self.finish(),
            }
        }
    }
}

/// Parse any byte stream as server-sent events
pub trait SseStreamExt: Stream + Sized {
    fn sse_events(self) -> SseStream<Self> {
        SseStream::new(self)
    }
}

impl<S: Stream> SseStreamExt for S {}

/// Meaning of one vendor event for the session
pub(crate) enum Decoded {
    Fragment(String),
    Skip,
    Malformed(String),
    Finished,
    Failed(GenerationError),
}

struct DecodeState<S, F> {
    events: S,
    decode: F,
    last_malformed: bool,
}

/// Map vendor events to text fragments.
///
/// Malformed events are logged and skipped. Only a decoded finish event ends
/// the stream cleanly: a body that closes without one was cut off, and fails
/// the session with a transport error.
pub(crate) fn decode_events<S, F>(provider: &'static str, events: S, decode: F) -> FragmentStream
where
    S: Stream<Item = Result<SseEvent, GenerationError>> + Unpin + Send + 'static,
    F: Fn(&SseEvent) -> Decoded + Send + 'static,
{
    let state = DecodeState {
        events,
        decode,
        last_malformed: false,
    };

    futures::stream::unfold(Some(state), move |state| async move {
        let mut state = state?;
        loop {
            let decoded = match state.events.next().await {
                None if state.last_malformed => {
                    return Some((
                        Err(GenerationError::transport(format!(
                            "{} stream ended with an undecodable event",
                            provider
                        ))),
                        None,
                    ));
                }
                None => {
                    return Some((
                        Err(GenerationError::transport(format!(
                            "{} stream ended without a finish signal",
                            provider
                        ))),
                        None,
                    ));
                }
                Some(Err(GenerationError::MalformedFragment(reason))) => Decoded::Malformed(reason),
                Some(Err(e)) => return Some((Err(e), None)),
                Some(Ok(event)) => (state.decode)(&event),
            };

            match decoded {
                Decoded::Fragment(text) => {
                    state.last_malformed = false;
                    return Some((Ok(text), Some(state)));
                }
                Decoded::Skip => state.last_malformed = false,
                Decoded::Malformed(reason) => {
                    warn!("Skipping malformed {} event: {}", provider, reason);
                    state.last_malformed = true;
                }
                Decoded::Finished => return None,
                Decoded::Failed(e) => return Some((Err(e), None)),
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn chunks(parts: Vec<Bytes>) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Unpin {
        stream::iter(parts.into_iter().map(Ok))
    }

    #[tokio::test]
    async fn test_events_split_across_chunks() {
        let mut events = chunks(vec![
            Bytes::from_static(b"data: {\"content\":\"\xEA\xB9"),
            Bytes::from_static(b"\x80\xEC\xB9\x98\"}\n"),
            Bytes::from_static(b"\ndata: second\n\n"),
        ])
        .sse_events();

        let first = events.next().await.unwrap().unwrap();
        assert_eq!(first.data, r#"{"content":"김치"}"#);
        let second = events.next().await.unwrap().unwrap();
        assert_eq!(second.data, "second");
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn test_comments_and_event_names() {
        let mut events = chunks(vec![Bytes::from_static(
            b": keep-alive\n\nevent: content_block_delta\r\ndata: x\r\n\r\n",
        )])
        .sse_events();

        let event = events.next().await.unwrap().unwrap();
        assert_eq!(event.event.as_deref(), Some("content_block_delta"));
        assert_eq!(event.data, "x");
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn test_invalid_utf8_event_is_skippable() {
        let mut events =
            chunks(vec![Bytes::from_static(b"data: \xFF\xFE\n\ndata: ok\n\n")]).sse_events();

        let bad = events.next().await.unwrap();
        assert!(matches!(bad, Err(GenerationError::MalformedFragment(_))));
        let good = events.next().await.unwrap().unwrap();
        assert_eq!(good.data, "ok");
    }

    #[tokio::test]
    async fn test_final_event_without_separator() {
        let mut events = chunks(vec![
            Bytes::from_static(b"data: a\n\n"),
            Bytes::from_static(b"data: [DONE]"),
        ])
        .sse_events();

        assert_eq!(events.next().await.unwrap().unwrap().data, "a");
        assert_eq!(events.next().await.unwrap().unwrap().data, "[DONE]");
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn test_truncated_final_event_escalates() {
        let mut events = chunks(vec![
            Bytes::from_static(b"data: a\n\n"),
            Bytes::from_static(b"data: \xEA\xB9"),
        ])
        .sse_events();

        assert_eq!(events.next().await.unwrap().unwrap().data, "a");
        let last = events.next().await.unwrap();
        assert!(matches!(last, Err(GenerationError::Transport(_))));
        assert!(events.next().await.is_none());
    }

    fn decode_text(event: &SseEvent) -> Decoded {
        match event.data.as_str() {
            "[DONE]" => Decoded::Finished,
            "" => Decoded::Skip,
            data if data.starts_with('!') => Decoded::Malformed(data.to_string()),
            data => Decoded::Fragment(data.to_string()),
        }
    }

    #[tokio::test]
    async fn test_decode_skips_malformed_events() {
        let events = chunks(vec![Bytes::from_static(
            b"data: one\n\ndata: !bad\n\ndata: two\n\ndata: [DONE]\n\ndata: ignored\n\n",
        )])
        .sse_events();

        let fragments: Vec<_> = decode_events("test", events, decode_text)
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(fragments, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_decode_escalates_malformed_final_event() {
        let events = chunks(vec![Bytes::from_static(b"data: one\n\ndata: !bad\n\n")]).sse_events();

        let results: Vec<_> = decode_events("test", events, decode_text).collect().await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().unwrap(), "one");
        assert!(matches!(results[1], Err(GenerationError::Transport(_))));
    }

    #[tokio::test]
    async fn test_decode_fails_without_finish_event() {
        let events = chunks(vec![Bytes::from_static(b"data: one\n\ndata: two\n\n")]).sse_events();

        let results: Vec<_> = decode_events("test", events, decode_text).collect().await;
        assert_eq!(results.len(), 3);
        assert_eq!(results[1].as_ref().unwrap(), "two");
        match &results[2] {
            Err(GenerationError::Transport(message)) => {
                assert!(message.contains("without a finish signal"))
            }
            other => panic!("unexpected item: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cr_only_line_endings() {
        let mut events = chunks(vec![Bytes::from_static(
            b"event: delta\rdata: a\rdata: b\r\rdata: c\r\r",
        )])
        .sse_events();

        let first = events.next().await.unwrap().unwrap();
        assert_eq!(first.event.as_deref(), Some("delta"));
        assert_eq!(first.data, "a\nb");
        assert_eq!(events.next().await.unwrap().unwrap().data, "c");
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn test_crlf_split_across_chunks() {
        let mut events = chunks(vec![
            Bytes::from_static(b"data: x\r"),
            Bytes::from_static(b"\n\r"),
            Bytes::from_static(b"\ndata: y\r"),
        ])
        .sse_events();

        assert_eq!(events.next().await.unwrap().unwrap().data, "x");
        assert_eq!(events.next().await.unwrap().unwrap().data, "y");
        assert!(events.next().await.is_none());
    }
}
