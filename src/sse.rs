//! Server-Sent Events (SSE) decoding for streamed chat completions.
//!
//! Events are separated by a blank line and carry a single `data: ` field:
//! ```text
//! data: {"choices":[{"delta":{"content":"Hel"}}]}
//!
//! data: {"choices":[{"delta":{"content":"lo"}}]}
//!
//! data: [DONE]
//! ```
//!
//! Bytes arrive in arbitrary chunks, so decoding is stateful at two levels:
//! UTF-8 sequences may be split across chunks, and events may be split
//! across (or packed several into) one chunk.

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use std::collections::VecDeque;

use crate::client::ClientError;

/// Separator between two events.
pub const EVENT_DELIMITER: &str = "\n\n";

/// Field prefix an event must start with to be considered.
pub const DATA_PREFIX: &str = "data: ";

/// Payload marking the end of the stream.
pub const DONE_MARKER: &str = "[DONE]";

/// Incremental UTF-8 decoder.
///
/// An incomplete multi-byte sequence at the end of a chunk is held back until
/// the next chunk completes it. Invalid sequences decode to U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `chunk` and append the text to `out`.
    pub fn decode(&mut self, chunk: &[u8], out: &mut String) {
        let joined;
        let mut bytes: &[u8] = if self.pending.is_empty() {
            chunk
        } else {
            self.pending.extend_from_slice(chunk);
            joined = std::mem::take(&mut self.pending);
            &joined
        };

        loop {
            match std::str::from_utf8(bytes) {
                Ok(text) => {
                    out.push_str(text);
                    return;
                }
                Err(e) => {
                    let (valid, rest) = bytes.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            bytes = &rest[len..];
                        }
                        None => {
                            self.pending = rest.to_vec();
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Flush at end of input. A dangling partial sequence becomes U+FFFD.
    pub fn finish(&mut self, out: &mut String) {
        if !self.pending.is_empty() {
            self.pending.clear();
            out.push(char::REPLACEMENT_CHARACTER);
        }
    }
}

/// Splits a byte stream into raw event blocks.
#[derive(Debug, Default)]
pub struct SseDecoder {
    utf8: Utf8Decoder,
    buffer: String,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return every event block it completed, in order.
    /// Whatever follows the last delimiter stays buffered.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.utf8.decode(chunk, &mut self.buffer);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.find(EVENT_DELIMITER) {
            events.push(self.buffer[..pos].to_string());
            self.buffer.drain(..pos + EVENT_DELIMITER.len());
        }
        events
    }

    /// Take the unterminated remainder once the byte stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        self.utf8.finish(&mut self.buffer);
        let rest = std::mem::take(&mut self.buffer);
        Some(rest).filter(|r| !r.trim().is_empty())
    }

    /// Text received but not yet terminated by a delimiter.
    pub fn buffered(&self) -> &str {
        &self.buffer
    }
}

/// A decoded event that carried a `data: ` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    /// The `[DONE]` sentinel.
    Done,
    /// Any other payload, trimmed, not yet parsed.
    Data(String),
}

/// Extract the payload of an event block.
///
/// Returns `None` unless the block starts with `data: `.
///
/// # Example
/// ```
/// use adapter_console::sse::event_payload;
///
/// assert_eq!(event_payload("data: {\"key\": \"value\"}"), Some("{\"key\": \"value\"}"));
/// assert_eq!(event_payload(": keep-alive"), None);
/// ```
pub fn event_payload(event: &str) -> Option<&str> {
    event.strip_prefix(DATA_PREFIX).map(str::trim)
}

/// Check if a payload is the end-of-stream sentinel.
///
/// # Example
/// ```
/// use adapter_console::sse::is_done_marker;
///
/// assert!(is_done_marker("[DONE]"));
/// assert!(!is_done_marker("{\"data\": \"value\"}"));
/// ```
pub fn is_done_marker(payload: &str) -> bool {
    payload == DONE_MARKER
}

/// Classify an event block; blocks without a data field yield `None`.
pub fn parse_event(event: &str) -> Option<SseFrame> {
    let payload = event_payload(event)?;
    if is_done_marker(payload) {
        Some(SseFrame::Done)
    } else {
        Some(SseFrame::Data(payload.to_string()))
    }
}

/// Extension trait turning a raw byte stream into a stream of SSE frames.
///
/// The returned stream suspends only while waiting for the next chunk; all
/// frames completed by a chunk are handed out before more bytes are read.
/// It ends after the first transport error.
pub trait SseStreamExt: Stream<Item = Result<Bytes, ClientError>> + Sized {
    fn sse_frames(self) -> impl Stream<Item = Result<SseFrame, ClientError>> + Send
    where
        Self: Send + 'static,
    {
        stream::unfold(
            (Box::pin(self), SseDecoder::new(), VecDeque::<String>::new(), false),
            |(mut byte_stream, mut decoder, mut ready, mut closed)| async move {
                loop {
                    while let Some(event) = ready.pop_front() {
                        if let Some(frame) = parse_event(&event) {
                            return Some((Ok(frame), (byte_stream, decoder, ready, closed)));
                        }
                    }

                    if closed {
                        return None;
                    }

                    match byte_stream.next().await {
                        Some(Ok(chunk)) => ready.extend(decoder.feed(&chunk)),
                        Some(Err(e)) => {
                            closed = true;
                            ready.clear();
                            return Some((Err(e), (byte_stream, decoder, ready, closed)));
                        }
                        None => {
                            // Upstream closed: a final block may lack its delimiter
                            closed = true;
                            ready.extend(decoder.finish());
                        }
                    }
                }
            },
        )
    }
}

impl<S> SseStreamExt for S where S: Stream<Item = Result<Bytes, ClientError>> + Sized {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_payload() {
        assert_eq!(event_payload("data: hello"), Some("hello"));
        assert_eq!(
            event_payload("data: {\"key\": \"value\"}"),
            Some("{\"key\": \"value\"}")
        );
        assert_eq!(event_payload("data:   spaces  \r"), Some("spaces"));
        assert_eq!(event_payload("data:no-space"), None);
        assert_eq!(event_payload("event: ping"), None);
        assert_eq!(event_payload(""), None);
    }

    #[test]
    fn test_is_done_marker() {
        assert!(is_done_marker("[DONE]"));
        assert!(!is_done_marker(""));
        assert!(!is_done_marker("data"));
        assert!(!is_done_marker("{\"key\": \"value\"}"));
    }

    #[test]
    fn test_utf8_split_across_chunks() {
        let text = "héllo → 世界";
        let bytes = text.as_bytes();
        let mut decoder = Utf8Decoder::new();
        let mut out = String::new();
        for byte in bytes {
            decoder.decode(std::slice::from_ref(byte), &mut out);
        }
        decoder.finish(&mut out);
        assert_eq!(out, text);
    }

    #[test]
    fn test_utf8_invalid_bytes_replaced() {
        let mut decoder = Utf8Decoder::new();
        let mut out = String::new();
        decoder.decode(b"a\xffb", &mut out);
        assert_eq!(out, "a\u{FFFD}b");
    }

    #[test]
    fn test_utf8_dangling_sequence_on_finish() {
        let mut decoder = Utf8Decoder::new();
        let mut out = String::new();
        decoder.decode(&"é".as_bytes()[..1], &mut out);
        assert_eq!(out, "");
        decoder.finish(&mut out);
        assert_eq!(out, "\u{FFFD}");
    }

    #[test]
    fn test_feed_multiple_events_in_one_chunk() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"data: one\n\ndata: two\n\ndata: thr");
        assert_eq!(events, vec!["data: one", "data: two"]);
        assert_eq!(decoder.buffered(), "data: thr");

        let events = decoder.feed(b"ee\n\n");
        assert_eq!(events, vec!["data: three"]);
        assert_eq!(decoder.buffered(), "");
    }

    #[test]
    fn test_delimiter_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: x\n").is_empty());
        assert_eq!(decoder.feed(b"\ndata: y"), vec!["data: x"]);
        assert_eq!(decoder.finish(), Some("data: y".to_string()));
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_parse_event() {
        assert_eq!(parse_event("data: [DONE]"), Some(SseFrame::Done));
        assert_eq!(
            parse_event("data: {\"a\":1}"),
            Some(SseFrame::Data("{\"a\":1}".to_string()))
        );
        assert_eq!(parse_event(": comment"), None);
    }

    #[tokio::test]
    async fn test_sse_frames_stream() {
        let chunks: Vec<Result<Bytes, ClientError>> = vec![
            Ok(Bytes::from_static(b": ping\n\ndata: {\"n\":1}\n")),
            Ok(Bytes::from_static(b"\ndata: [DONE]\n\n")),
        ];
        let frames: Vec<_> = stream::iter(chunks)
            .sse_frames()
            .map(|r| r.unwrap())
            .collect()
            .await;

        assert_eq!(
            frames,
            vec![SseFrame::Data("{\"n\":1}".to_string()), SseFrame::Done]
        );
    }

    #[tokio::test]
    async fn test_sse_frames_stops_after_error() {
        let chunks: Vec<Result<Bytes, ClientError>> = vec![
            Ok(Bytes::from_static(b"data: a\n\n")),
            Err(ClientError::ProviderError("connection reset".to_string())),
            Ok(Bytes::from_static(b"data: b\n\n")),
        ];
        let results: Vec<_> = stream::iter(chunks).sse_frames().collect().await;

        assert_eq!(results.len(), 2);
        assert!(matches!(results[0], Ok(SseFrame::Data(ref d)) if d == "a"));
        assert!(results[1].is_err());
    }
}
