//! Request and event types exchanged with the stream ingestor.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::client::StreamError;
use crate::options::SecretString;

/// One streaming request. Built fresh per call and never mutated by the ingestor.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    /// Endpoint path, resolved against the configured base URL
    pub endpoint: String,

    /// JSON request body
    pub body: Value,

    /// Per-request headers; these override configured and default headers
    pub headers: HashMap<String, String>,

    /// Bearer token sent as `Authorization: Bearer <token>`
    pub token: Option<SecretString>,
}

impl StreamRequest {
    /// Create a request, serialising `body` to JSON.
    pub fn new(endpoint: impl Into<String>, body: &impl Serialize) -> Result<Self, StreamError> {
        Ok(Self {
            endpoint: endpoint.into(),
            body: serde_json::to_value(body)?,
            headers: HashMap::new(),
            token: None,
        })
    }

    /// Set the bearer token.
    pub fn with_token(mut self, token: impl Into<SecretString>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Add a single header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// Discriminant of a [`ServerEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Content,
    Thinking,
    Tip,
    Done,
    Unknown,
}

/// Generation statistics carried by a `tip` event.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TipInfo {
    /// Total generation time in seconds
    #[serde(default)]
    pub total_time: Option<f64>,

    /// Any other statistics the server included
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A decoded event, produced once per complete `data:` line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ServerEvent {
    /// Answer text fragment
    Content(String),

    /// Intermediate reasoning fragment
    Thinking(String),

    /// Generation statistics
    Tip(TipInfo),

    /// Explicit completion signal sent as a JSON event.
    /// Unlike the `[DONE]` terminator this does not end the stream.
    Done,

    /// Any other `type`, passed through untouched; `kind` keeps the raw JSON value
    Unknown {
        kind: Option<Value>,
        message: Option<Value>,
    },
}

impl ServerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ServerEvent::Content(_) => EventKind::Content,
            ServerEvent::Thinking(_) => EventKind::Thinking,
            ServerEvent::Tip(_) => EventKind::Tip,
            ServerEvent::Done => EventKind::Done,
            ServerEvent::Unknown { .. } => EventKind::Unknown,
        }
    }

    /// Text payload of content and thinking events.
    pub fn text(&self) -> Option<&str> {
        match self {
            ServerEvent::Content(text) | ServerEvent::Thinking(text) => Some(text),
            _ => None,
        }
    }
}

/// How one stream invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// The transport reported end-of-input
    Completed,

    /// The server sent the `[DONE]` terminator
    Terminated,

    /// The caller released the stream before it ended
    Cancelled,

    /// An error was delivered to the handler's `on_error`
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stream_request_serialises_body() {
        #[derive(Serialize)]
        struct Body {
            content: &'static str,
            memorized: bool,
        }

        let request = StreamRequest::new("/user/chat", &Body { content: "hi", memorized: true })
            .unwrap()
            .with_token("tok")
            .with_header("X-Trace", "1");

        assert_eq!(request.body, json!({"content": "hi", "memorized": true}));
        assert_eq!(request.token.unwrap().expose_secret(), "tok");
        assert_eq!(request.headers["X-Trace"], "1");
    }

    #[test]
    fn test_event_kind_and_text() {
        assert_eq!(ServerEvent::Content("a".into()).kind(), EventKind::Content);
        assert_eq!(ServerEvent::Thinking("b".into()).text(), Some("b"));
        assert_eq!(ServerEvent::Done.text(), None);
        let unknown = ServerEvent::Unknown { kind: Some("ping".into()), message: None };
        assert_eq!(unknown.kind(), EventKind::Unknown);
    }

    #[test]
    fn test_tip_info_keeps_extra_fields() {
        let tip: TipInfo = serde_json::from_str(r#"{"total_time":1.5,"tokens":42}"#).unwrap();
        assert_eq!(tip.total_time, Some(1.5));
        assert_eq!(tip.extra["tokens"], json!(42));
    }
}
