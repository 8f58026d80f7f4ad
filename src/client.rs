//! Core seams and error types: the transport that produces bytes and the
//! handler that consumes events.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use reqwest::StatusCode;
use thiserror::Error;

use crate::model::{ServerEvent, StreamRequest};

/// Boxed error carried by [`StreamError::Transport`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Raw response body as delivered by a [`Transport`], chunked arbitrarily.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StreamError>> + Send>>;

/// Errors that can occur while opening or reading a stream.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("HTTP status {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("Transport error: {0}")]
    Transport(BoxError),

    #[error("Response body is not readable: {0}")]
    ResourceUnavailable(String),

    #[error("JSON error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl StreamError {
    /// True for connection-level failures: a non-2xx status or a dropped connection.
    pub fn is_transport(&self) -> bool {
        matches!(self, StreamError::Status { .. } | StreamError::Transport(_))
    }

    /// HTTP status code, when the server answered with a non-2xx status.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            StreamError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for StreamError {
    fn from(err: reqwest::Error) -> Self {
        StreamError::Transport(Box::new(err))
    }
}

/// Opens the byte stream for one request.
///
/// [`HttpTransport`](crate::http::HttpTransport) is the real implementation;
/// anything that can produce chunked bytes (a test fixture, a replayed capture)
/// can stand in for it.
///
/// Implementations must report a non-2xx answer as [`StreamError::Status`]
/// before yielding any bytes. Dropping the returned stream must release the
/// underlying connection.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, request: &StreamRequest) -> Result<ByteStream, StreamError>;
}

/// Receives the events of one stream invocation.
///
/// `on_message` is called once per complete event in server order.
/// `on_error` is called at most once, after which no further calls happen.
pub trait EventHandler {
    fn on_message(&mut self, event: ServerEvent);

    fn on_error(&mut self, error: StreamError) {
        tracing::error!(%error, "stream failed");
    }
}

/// [`EventHandler`] built from closures.
///
/// # Example
/// ```
/// use tutor_stream::client::Handlers;
/// use tutor_stream::model::ServerEvent;
///
/// let mut answer = String::new();
/// let handler = Handlers::new(|event: ServerEvent| {
///     if let ServerEvent::Content(text) = event {
///         answer.push_str(&text);
///     }
/// })
/// .with_error(|error| eprintln!("stream failed: {}", error));
/// # drop(handler);
/// ```
pub struct Handlers<M, E = fn(StreamError)> {
    on_message: M,
    on_error: Option<E>,
}

impl<M> Handlers<M>
where
    M: FnMut(ServerEvent),
{
    pub fn new(on_message: M) -> Self {
        Self {
            on_message,
            on_error: None,
        }
    }
}

impl<M, E> Handlers<M, E>
where
    M: FnMut(ServerEvent),
    E: FnMut(StreamError),
{
    /// Attach an error callback.
    pub fn with_error<F>(self, on_error: F) -> Handlers<M, F>
    where
        F: FnMut(StreamError),
    {
        Handlers {
            on_message: self.on_message,
            on_error: Some(on_error),
        }
    }
}

impl<M, E> EventHandler for Handlers<M, E>
where
    M: FnMut(ServerEvent),
    E: FnMut(StreamError),
{
    fn on_message(&mut self, event: ServerEvent) {
        (self.on_message)(event)
    }

    fn on_error(&mut self, error: StreamError) {
        match self.on_error.as_mut() {
            Some(on_error) => on_error(error),
            None => tracing::error!(%error, "stream failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_classification() {
        let status = StreamError::Status {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: String::new(),
        };
        assert!(status.is_transport());
        assert_eq!(status.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));

        let dropped = StreamError::Transport("connection reset".into());
        assert!(dropped.is_transport());
        assert_eq!(dropped.status(), None);

        assert!(!StreamError::ResourceUnavailable("no body".into()).is_transport());
        assert!(!StreamError::Config("bad".into()).is_transport());
    }

    #[test]
    fn test_handlers_dispatch() {
        let mut seen = Vec::new();
        let mut errors = 0;
        {
            let mut handler =
                Handlers::new(|event: ServerEvent| seen.push(event)).with_error(|_| errors += 1);
            handler.on_message(ServerEvent::Content("a".into()));
            handler.on_message(ServerEvent::Done);
            handler.on_error(StreamError::Config("x".into()));
        }
        assert_eq!(seen, vec![ServerEvent::Content("a".into()), ServerEvent::Done]);
        assert_eq!(errors, 1);
    }
}
