//! Tutoring chat: the request sent to the chat endpoint and a handler that
//! accumulates the streamed answer.

use std::time::{Duration, Instant};

use futures::StreamExt;
use serde::{Deserialize, Serialize};

use crate::client::{EventHandler, StreamError, Transport};
use crate::model::{ServerEvent, StreamRequest};
use crate::options::SecretString;
use crate::stream::StreamIngestor;

/// Endpoint serving AI summaries, hints and answers.
pub const CHAT_ENDPOINT: &str = "/user/chat";

/// Body of a chat request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Prompt text
    pub content: String,

    /// Whether the backend keeps this exchange in the conversation memory
    pub memorized: bool,
}

impl ChatRequest {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            memorized: false,
        }
    }

    pub fn memorized(mut self, memorized: bool) -> Self {
        self.memorized = memorized;
        self
    }

    /// Build the streaming request for [`CHAT_ENDPOINT`].
    pub fn into_stream_request(
        self,
        token: Option<SecretString>,
    ) -> Result<StreamRequest, StreamError> {
        let mut request = StreamRequest::new(CHAT_ENDPOINT, &self)?;
        request.token = token;
        Ok(request)
    }
}

/// Accumulated state of one streamed answer.
///
/// Content and thinking fragments are concatenated in arrival order. Timing
/// comes from the server's `tip` event; when the server sends none, the time
/// from creation until the `done` event is used instead.
#[derive(Debug, Clone)]
pub struct ChatTranscript {
    pub content: String,
    pub thinking: String,
    pub server_time: Option<f64>,
    pub done: bool,
    pub error: Option<String>,
    started: Instant,
    elapsed: Option<Duration>,
}

impl Default for ChatTranscript {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatTranscript {
    pub fn new() -> Self {
        Self {
            content: String::new(),
            thinking: String::new(),
            server_time: None,
            done: false,
            error: None,
            started: Instant::now(),
            elapsed: None,
        }
    }

    /// Generation time in seconds, preferring the server's figure.
    pub fn total_time(&self) -> Option<f64> {
        self.server_time
            .or_else(|| self.elapsed.map(|elapsed| elapsed.as_secs_f64()))
    }

    pub fn apply(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Content(text) => self.content.push_str(&text),
            ServerEvent::Thinking(text) => self.thinking.push_str(&text),
            ServerEvent::Tip(tip) => {
                if tip.total_time.is_some() {
                    self.server_time = tip.total_time;
                }
            }
            ServerEvent::Done => {
                if !self.done {
                    self.done = true;
                    self.elapsed = Some(self.started.elapsed());
                }
            }
            ServerEvent::Unknown { kind, .. } => {
                tracing::debug!(?kind, "ignoring event of unknown kind");
            }
        }
    }
}

impl EventHandler for ChatTranscript {
    fn on_message(&mut self, event: ServerEvent) {
        self.apply(event);
    }

    fn on_error(&mut self, error: StreamError) {
        tracing::error!(%error, "chat stream failed");
        if self.error.is_none() {
            self.error = Some(error.to_string());
        }
    }
}

/// Stream a chat answer to completion and return it.
pub async fn collect<T: Transport>(
    ingestor: &StreamIngestor<T>,
    request: ChatRequest,
    token: Option<SecretString>,
) -> Result<ChatTranscript, StreamError> {
    let mut transcript = ChatTranscript::new();
    let mut events = ingestor.events(request.into_stream_request(token)?).await?;
    while let Some(event) = events.next().await {
        transcript.apply(event?);
    }
    Ok(transcript)
}
