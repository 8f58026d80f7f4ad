//! Server-Sent Events (SSE) decoding.
//!
//! Turns an arbitrarily chunked byte stream into [`ServerEvent`]s. Only `data:`
//! lines carry meaning; everything else (blank keep-alives, `:` comments,
//! `event:` lines) is ignored.
//!
//! SSE format:
//! ```text
//! data: {"type":"content","message":"partial answer text"}
//! data: {"type":"think","message":"reasoning fragment"}
//! data: {"type":"tip","message":"{\"total_time\":1.23}"}
//! data: {"type":"done"}
//! data: [DONE]
//! ```

use std::collections::VecDeque;

use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::client::{ByteStream, StreamError};
use crate::model::{ServerEvent, TipInfo};

const DATA_PREFIX: &str = "data:";
const DONE_MARKER: &str = "[DONE]";

/// Text accumulated across chunk boundaries.
///
/// Bytes are decoded as UTF-8 incrementally: a multi-byte character split
/// across two chunks is held back until its remaining bytes arrive. Invalid
/// sequences decode to U+FFFD.
#[derive(Debug, Default)]
pub struct LineBuffer {
    text: String,
    partial: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a raw chunk.
    pub fn push(&mut self, chunk: &[u8]) {
        let mut bytes = std::mem::take(&mut self.partial);
        bytes.extend_from_slice(chunk);

        let mut rest = &bytes[..];
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    self.text.push_str(valid);
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    self.text.push_str(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        Some(len) => {
                            self.text.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            // Incomplete sequence at the end of the chunk
                            self.partial = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Take the next complete line, without its `\n`.
    pub fn next_line(&mut self) -> Option<String> {
        let pos = self.text.find('\n')?;
        let line = self.text[..pos].to_string();
        self.text.drain(..=pos);
        Some(line)
    }

    /// Flush everything left after end-of-input as one final line.
    pub fn finish(&mut self) -> Option<String> {
        if !self.partial.is_empty() {
            self.partial.clear();
            self.text.push(char::REPLACEMENT_CHARACTER);
        }
        if self.text.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.text))
    }

    pub fn clear(&mut self) {
        self.text.clear();
        self.partial.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.partial.is_empty()
    }
}

/// A decoded unit of the stream: an event or the terminator.
#[derive(Debug, Clone, PartialEq)]
pub enum SseFrame {
    Event(ServerEvent),
    Terminator,
}

/// Incremental decoder for one stream invocation.
///
/// Once the terminator is seen the decoder stops: later input is discarded.
#[derive(Debug, Default)]
pub struct SseDecoder {
    lines: LineBuffer,
    terminated: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a raw chunk and return the frames of every line it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        let mut frames = Vec::new();
        if self.terminated {
            return frames;
        }

        self.lines.push(chunk);
        while let Some(line) = self.lines.next_line() {
            if self.accept(&line, &mut frames) {
                break;
            }
        }
        frames
    }

    /// Signal end-of-input; an unterminated final line is decoded here.
    pub fn finish(&mut self) -> Vec<SseFrame> {
        let mut frames = Vec::new();
        if self.terminated {
            return frames;
        }
        if let Some(line) = self.lines.finish() {
            self.accept(&line, &mut frames);
        }
        frames
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Decode one line into `frames`; returns true when it was the terminator.
    fn accept(&mut self, line: &str, frames: &mut Vec<SseFrame>) -> bool {
        match decode_line(line) {
            Some(SseFrame::Terminator) => {
                debug!("received stream terminator");
                self.terminated = true;
                self.lines.clear();
                frames.push(SseFrame::Terminator);
                true
            }
            Some(frame) => {
                frames.push(frame);
                false
            }
            None => false,
        }
    }
}

/// Parse an SSE line to extract the data portion.
///
/// Accepts both `data: <content>` and `data:<content>`; exactly one space after
/// the colon is removed.
///
/// # Example
/// ```
/// use tutor_stream::sse::parse_sse_line;
///
/// assert_eq!(parse_sse_line("data: {\"key\": \"value\"}"), Some("{\"key\": \"value\"}"));
/// assert_eq!(parse_sse_line("data:[DONE]"), Some("[DONE]"));
/// assert_eq!(parse_sse_line(": keep-alive"), None);
/// ```
pub fn parse_sse_line(line: &str) -> Option<&str> {
    line.strip_prefix(DATA_PREFIX)
        .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
}

/// Check if an SSE data payload is the stream terminator.
///
/// # Example
/// ```
/// use tutor_stream::sse::is_done_marker;
///
/// assert!(is_done_marker("[DONE]"));
/// assert!(!is_done_marker("{\"type\":\"done\"}"));
/// ```
pub fn is_done_marker(data: &str) -> bool {
    data == DONE_MARKER
}

/// Decode one complete line. `None` means the line produces nothing.
pub fn decode_line(line: &str) -> Option<SseFrame> {
    let payload = parse_sse_line(line.trim())?;
    if payload.is_empty() {
        return None;
    }
    if is_done_marker(payload) {
        return Some(SseFrame::Terminator);
    }
    decode_payload(payload).map(SseFrame::Event)
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type", default)]
    kind: Option<Value>,
    #[serde(default)]
    message: Option<Value>,
}

/// Decode a JSON data payload into an event.
///
/// Malformed payloads are logged and skipped, never surfaced as errors.
pub fn decode_payload(payload: &str) -> Option<ServerEvent> {
    let envelope: Envelope = match serde_json::from_str(payload) {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!(%err, payload, "skipping malformed SSE data line");
            return None;
        }
    };

    match envelope.kind.as_ref().and_then(Value::as_str) {
        Some("think") | Some("thinking") => {
            message_text(envelope.message).map(ServerEvent::Thinking)
        }
        Some("content") => message_text(envelope.message).map(ServerEvent::Content),
        Some("tip") => decode_tip(envelope.message).map(ServerEvent::Tip),
        Some("done") => Some(ServerEvent::Done),
        _ => Some(ServerEvent::Unknown {
            kind: envelope.kind.clone(),
            message: envelope.message,
        }),
    }
}

fn message_text(message: Option<Value>) -> Option<String> {
    match message {
        Some(Value::String(text)) => Some(text),
        Some(Value::Null) | None => {
            debug!("skipping SSE event without message");
            None
        }
        Some(other) => Some(other.to_string()),
    }
}

/// The tip message is JSON encoded inside a string; a bare object is accepted too.
fn decode_tip(message: Option<Value>) -> Option<TipInfo> {
    let parsed: Result<TipInfo, serde_json::Error> = match message {
        Some(Value::String(text)) => serde_json::from_str(&text),
        Some(value @ Value::Object(_)) => serde_json::from_value(value),
        _ => {
            debug!("skipping tip event without message");
            return None;
        }
    };

    match parsed {
        Ok(tip) => Some(tip),
        Err(err) => {
            warn!(%err, "skipping malformed tip payload");
            None
        }
    }
}

struct FrameState {
    bytes: ByteStream,
    decoder: SseDecoder,
    pending: VecDeque<SseFrame>,
    finished: bool,
}

/// Decode a byte stream into frames.
///
/// The stream ends after yielding [`SseFrame::Terminator`], after end-of-input,
/// or after yielding a transport error. The byte stream is dropped as soon as
/// the frame stream ends.
pub fn decode_frames(
    bytes: ByteStream,
) -> impl Stream<Item = Result<SseFrame, StreamError>> + Send {
    let state = FrameState {
        bytes,
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(frame) = state.pending.pop_front() {
                return Some((Ok(frame), state));
            }
            if state.finished {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    let frames = state.decoder.feed(&chunk);
                    state.pending.extend(frames);
                    if state.decoder.is_terminated() {
                        state.finished = true;
                    }
                }
                Some(Err(err)) => {
                    state.finished = true;
                    return Some((Err(err), state));
                }
                None => {
                    debug!("stream reached end of input");
                    let frames = state.decoder.finish();
                    state.pending.extend(frames);
                    state.finished = true;
                }
            }
        }
    })
}

/// Decode a byte stream into events, dropping the terminator frame.
pub fn decode_events(
    bytes: ByteStream,
) -> impl Stream<Item = Result<ServerEvent, StreamError>> + Send {
    decode_frames(bytes).filter_map(|frame| async move {
        match frame {
            Ok(SseFrame::Event(event)) => Some(Ok(event)),
            Ok(SseFrame::Terminator) => None,
            Err(err) => Some(Err(err)),
        }
    })
}
