//! Line framing for the `data: <json>` event stream.
//!
//! Bytes are buffered until a newline arrives, so a record split across
//! chunks (even inside a multi-byte character) is parsed exactly once.
//! Events come out in the order their terminating newline was received.

use std::collections::VecDeque;

use futures::{Stream, StreamExt};
use thiserror::Error;
use tracing::{debug, warn};

use crate::adapters::TransportError;
use crate::domain::RawEvent;

const DATA_PREFIX: &str = "data: ";

/// A single line that could not be turned into an event
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("stream line is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("malformed event payload: {source}")]
    Json {
        line: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Incremental framer: feed chunks, collect complete events
#[derive(Debug, Default)]
pub struct EventFramer {
    buffer: Vec<u8>,
    /// Prefix of `buffer` already known to hold no newline
    scanned: usize,
    emitted: usize,
    skipped: usize,
}

impl EventFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every event it completed, in order
    pub fn push(&mut self, chunk: &[u8]) -> Vec<RawEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        let mut start = 0;
        let mut from = self.scanned;
        while let Some(offset) = self.buffer[from..].iter().position(|b| *b == b'\n') {
            let end = from + offset;
            let parsed = parse_line(&self.buffer[start..end]);
            self.record(parsed, &mut events);
            start = end + 1;
            from = start;
        }
        self.buffer.drain(..start);
        self.scanned = self.buffer.len();

        events
    }

    /// Flush an unterminated final line at end of stream
    pub fn finish(&mut self) -> Option<RawEvent> {
        let rest = std::mem::take(&mut self.buffer);
        self.scanned = 0;
        if rest.iter().all(u8::is_ascii_whitespace) {
            return None;
        }

        let mut events = Vec::new();
        self.record(parse_line(&rest), &mut events);
        events.pop()
    }

    /// Lines dropped because they could not be parsed
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn emitted(&self) -> usize {
        self.emitted
    }

    /// Bytes waiting for a newline
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    fn record(&mut self, parsed: Result<Option<RawEvent>, FrameError>, out: &mut Vec<RawEvent>) {
        match parsed {
            Ok(Some(event)) => {
                self.emitted += 1;
                out.push(event);
            }
            Ok(None) => {}
            Err(e) => {
                self.skipped += 1;
                match &e {
                    FrameError::Json { line, .. } => {
                        warn!(error = %e, line = %line, "Skipping malformed stream line")
                    }
                    FrameError::Utf8(_) => warn!(error = %e, "Skipping malformed stream line"),
                }
            }
        }
    }
}

/// Parse one line (without its newline)
///
/// Lines without the `data: ` prefix (blank separators, comments) yield `None`.
pub fn parse_line(bytes: &[u8]) -> Result<Option<RawEvent>, FrameError> {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    let line = std::str::from_utf8(bytes)?;

    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        if !line.is_empty() {
            debug!(line = %line, "Ignoring non-data stream line");
        }
        return Ok(None);
    };

    serde_json::from_str(payload)
        .map(Some)
        .map_err(|source| FrameError::Json {
            line: line.to_string(),
            source,
        })
}

struct FrameState<S> {
    bytes: S,
    framer: EventFramer,
    ready: VecDeque<RawEvent>,
    done: bool,
}

/// Lazily frame a byte stream into events
///
/// A transport error is yielded once and ends the sequence. The sequence
/// also ends when the byte stream does; there is no timeout.
pub fn frame_stream<S>(bytes: S) -> impl Stream<Item = Result<RawEvent, TransportError>>
where
    S: Stream<Item = Result<Vec<u8>, TransportError>> + Unpin,
{
    let state = FrameState {
        bytes,
        framer: EventFramer::new(),
        ready: VecDeque::new(),
        done: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.ready.pop_front() {
                return Some((Ok(event), state));
            }
            if state.done {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => state.ready.extend(state.framer.push(&chunk)),
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(e), state));
                }
                None => {
                    state.done = true;
                    state.ready.extend(state.framer.finish());
                    debug!(
                        emitted = state.framer.emitted(),
                        skipped = state.framer.skipped(),
                        "Event stream ended"
                    );
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_line_is_buffered() {
        let mut framer = EventFramer::new();

        assert!(framer.push(b"data: {\"type\":\"sta").is_empty());
        assert!(framer.pending() > 0);

        let events = framer.push(b"ge1_start\"}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "stage1_start");
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn test_multiple_events_in_one_chunk_keep_order() {
        let mut framer = EventFramer::new();
        let events = framer.push(
            b"data: {\"type\":\"stage1_start\"}\n\ndata: {\"type\":\"stage2_start\"}\n\ndata: {\"type\":\"complete\"}\n\n",
        );

        let kinds: Vec<&str> = events.iter().map(|e| e.kind.as_str()).collect();
        assert_eq!(kinds, vec!["stage1_start", "stage2_start", "complete"]);
    }

    #[test]
    fn test_long_line_in_small_chunks_is_scanned_once() {
        let response = "x".repeat(64 * 1024);
        let frame = format!(
            "data: {{\"type\":\"stage3_complete\",\"data\":{{\"model\":\"chair\",\"response\":\"{}\"}}}}\n\ndata: {{\"type\":\"complete\"}}\n",
            response
        );

        let mut framer = EventFramer::new();
        let mut events = Vec::new();
        for chunk in frame.as_bytes().chunks(16) {
            events.extend(framer.push(chunk));
            // Everything still buffered has already been searched for a newline
            assert_eq!(framer.scanned, framer.pending());
        }

        let kinds: Vec<&str> = events.iter().map(|e| e.kind.as_str()).collect();
        assert_eq!(kinds, vec!["stage3_complete", "complete"]);
        assert_eq!(events[0].data["response"].as_str().unwrap().len(), response.len());
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn test_malformed_line_is_skipped() {
        let mut framer = EventFramer::new();
        let events = framer.push(b"data: {not json}\n\ndata: {\"type\":\"complete\"}\n\n");

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "complete");
        assert_eq!(framer.skipped(), 1);
    }

    #[test]
    fn test_unterminated_tail_is_parsed_at_finish() {
        let mut framer = EventFramer::new();
        assert!(framer.push(b"data: {\"type\":\"complete\"}").is_empty());

        let last = framer.finish().unwrap();
        assert_eq!(last.kind, "complete");
        assert!(framer.finish().is_none());
    }

    #[test]
    fn test_whitespace_tail_is_ignored() {
        let mut framer = EventFramer::new();
        framer.push(b"data: {\"type\":\"complete\"}\n\n  ");
        assert!(framer.finish().is_none());
        assert_eq!(framer.skipped(), 0);
    }

    #[test]
    fn test_crlf_and_comments() {
        let mut framer = EventFramer::new();
        let events = framer.push(b": keep-alive\r\ndata: {\"type\":\"complete\"}\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(framer.skipped(), 0);
    }

    #[test]
    fn test_multibyte_character_split_across_chunks() {
        let frame = "data: {\"type\":\"stage1_complete\",\"data\":[{\"model\":\"m\",\"response\":\"caf\u{e9} \u{1f980}\"}]}\n";
        let bytes = frame.as_bytes();
        let crab = frame.find('\u{1f980}').unwrap();

        let mut framer = EventFramer::new();
        assert!(framer.push(&bytes[..crab + 2]).is_empty());
        let events = framer.push(&bytes[crab + 2..]);

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data[0]["response"], "caf\u{e9} \u{1f980}");
    }

    #[tokio::test]
    async fn test_frame_stream_ends_on_transport_error() {
        let chunks: Vec<Result<Vec<u8>, TransportError>> = vec![
            Ok(b"data: {\"type\":\"stage1_start\"}\n\n".to_vec()),
            Err(TransportError::Stream("connection reset".to_string())),
            Ok(b"data: {\"type\":\"complete\"}\n\n".to_vec()),
        ];

        let events: Vec<_> = frame_stream(futures::stream::iter(chunks)).collect().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].as_ref().unwrap().kind, "stage1_start");
        assert!(matches!(events[1], Err(TransportError::Stream(_))));
    }
}
