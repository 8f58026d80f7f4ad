//! The stream ingestor: opens an event stream and dispatches decoded events.

use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::debug;

use crate::client::{EventHandler, StreamError, Transport};
use crate::http::HttpTransport;
use crate::model::{ServerEvent, StreamOutcome, StreamRequest};
use crate::options::TransportOptions;
use crate::sse::{decode_events, decode_frames, SseFrame};

/// Pull-based form of a stream: lazy, single pass, not restartable.
/// Dropping it releases the connection.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<ServerEvent, StreamError>> + Send>>;

/// Opens event streams and delivers their events in arrival order.
///
/// Each invocation owns its decoder; the ingestor itself only shares the
/// read-only transport, so any number of streams may run concurrently.
///
/// # Example
/// ```no_run
/// use tutor_stream::client::Handlers;
/// use tutor_stream::model::{ServerEvent, StreamRequest};
/// use tutor_stream::options::TransportOptions;
/// use tutor_stream::stream::StreamIngestor;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn run() -> Result<(), tutor_stream::client::StreamError> {
/// let ingestor = StreamIngestor::new(TransportOptions::default())?;
/// let request = StreamRequest::new(
///     "/user/chat",
///     &serde_json::json!({"content": "What is a JOIN?", "memorized": false}),
/// )?
/// .with_token("token");
///
/// let mut handler = Handlers::new(|event: ServerEvent| {
///     if let ServerEvent::Content(text) = event {
///         print!("{}", text);
///     }
/// });
/// ingestor.open_stream(request, &mut handler, &CancellationToken::new()).await;
/// # Ok(())
/// # }
/// ```
pub struct StreamIngestor<T = HttpTransport> {
    transport: Arc<T>,
}

impl<T> Clone for StreamIngestor<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
        }
    }
}

impl StreamIngestor<HttpTransport> {
    /// Create an ingestor over HTTP.
    pub fn new(options: TransportOptions) -> Result<Self, StreamError> {
        Ok(Self::with_transport(HttpTransport::new(options)?))
    }
}

impl<T: Transport> StreamIngestor<T> {
    pub fn with_transport(transport: T) -> Self {
        Self {
            transport: Arc::new(transport),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Open a stream and return its events as a pull-based stream.
    ///
    /// Opening errors (status, unreadable body) are returned directly; errors
    /// after that appear once as the last item.
    pub async fn events(&self, request: StreamRequest) -> Result<EventStream, StreamError> {
        let bytes = self.transport.open(&request).await?;
        Ok(Box::pin(decode_events(bytes)))
    }

    /// Open a stream and dispatch every event to `handler` until it ends.
    ///
    /// Errors go to `handler.on_error` exactly once. After `cancel` fires no
    /// further handler calls are made, and the connection has been released
    /// by the time this returns.
    pub async fn open_stream<H>(
        &self,
        request: StreamRequest,
        handler: &mut H,
        cancel: &CancellationToken,
    ) -> StreamOutcome
    where
        H: EventHandler + ?Sized,
    {
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(endpoint = %request.endpoint, "stream cancelled before open");
                return StreamOutcome::Cancelled;
            }
            opened = self.transport.open(&request) => opened,
        };

        let bytes = match opened {
            Ok(bytes) => bytes,
            Err(err) => {
                handler.on_error(err);
                return StreamOutcome::Failed;
            }
        };

        let frames = decode_frames(bytes);
        futures::pin_mut!(frames);

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(endpoint = %request.endpoint, "stream cancelled");
                    return StreamOutcome::Cancelled;
                }
                next = frames.next() => next,
            };

            match next {
                Some(Ok(SseFrame::Event(event))) => handler.on_message(event),
                Some(Ok(SseFrame::Terminator)) => return StreamOutcome::Terminated,
                Some(Err(err)) => {
                    handler.on_error(err);
                    return StreamOutcome::Failed;
                }
                None => return StreamOutcome::Completed,
            }
        }
    }
}

impl<T: Transport + 'static> StreamIngestor<T> {
    /// Run a stream on a background task.
    ///
    /// The stream lives as long as the returned handle: dropping the handle
    /// cancels it. [`StreamHandle::join`] hands the handler back, so an
    /// accumulating handler such as [`ChatTranscript`](crate::chat::ChatTranscript)
    /// can be read once the stream ends.
    pub fn spawn<H>(&self, request: StreamRequest, mut handler: H) -> StreamHandle<H>
    where
        H: EventHandler + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let ingestor = self.clone();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            let outcome = ingestor.open_stream(request, &mut handler, &token).await;
            (outcome, handler)
        });

        StreamHandle {
            task,
            cancel: cancel.clone(),
            _guard: cancel.drop_guard(),
        }
    }
}

/// Owns a stream started with [`StreamIngestor::spawn`].
pub struct StreamHandle<H> {
    task: JoinHandle<(StreamOutcome, H)>,
    cancel: CancellationToken,
    _guard: DropGuard,
}

impl<H> StreamHandle<H> {
    /// Stop the stream; no handler calls happen once the task observes this.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the stream to end and take back its handler.
    ///
    /// Fails only when the background task panicked or was aborted.
    pub async fn join(mut self) -> Result<(StreamOutcome, H), JoinError> {
        (&mut self.task).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::ChatTranscript;
    use crate::client::{ByteStream, Handlers};
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::stream;
    use reqwest::StatusCode;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::task::{Context, Poll};

    /// Byte stream that records when it is dropped.
    struct Tracked {
        inner: ByteStream,
        released: Arc<AtomicBool>,
    }

    impl Stream for Tracked {
        type Item = Result<Bytes, StreamError>;

        fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            self.inner.as_mut().poll_next(cx)
        }
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    enum Script {
        Chunks(Vec<String>),
        /// Yield the chunks, then never finish
        Stall(Vec<String>),
        Fail(StatusCode),
        Unreadable,
    }

    struct FakeTransport {
        script: Script,
        released: Arc<AtomicBool>,
        opened: AtomicUsize,
    }

    impl FakeTransport {
        fn new(script: Script) -> Self {
            Self {
                script,
                released: Arc::new(AtomicBool::new(false)),
                opened: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn open(&self, _request: &StreamRequest) -> Result<ByteStream, StreamError> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            let inner: ByteStream = match &self.script {
                Script::Chunks(chunks) => Box::pin(stream::iter(
                    chunks.clone().into_iter().map(|c| Ok(Bytes::from(c))),
                )),
                Script::Stall(chunks) => Box::pin(
                    stream::iter(chunks.clone().into_iter().map(|c| Ok(Bytes::from(c))))
                        .chain(stream::pending()),
                ),
                Script::Fail(status) => {
                    return Err(StreamError::Status {
                        status: *status,
                        body: "boom".to_string(),
                    })
                }
                Script::Unreadable => {
                    return Err(StreamError::ResourceUnavailable("no body".to_string()))
                }
            };
            Ok(Box::pin(Tracked {
                inner,
                released: Arc::clone(&self.released),
            }))
        }
    }

    fn request() -> StreamRequest {
        let body = serde_json::json!({"content": "q", "memorized": false});
        StreamRequest::new("/user/chat", &body).unwrap()
    }

    fn chunks(items: &[&str]) -> Vec<String> {
        items.iter().map(|item| item.to_string()).collect()
    }

    fn content(message: &str) -> String {
        format!("data: {{\"type\":\"content\",\"message\":\"{}\"}}\n", message)
    }

    #[derive(Default)]
    struct Recorder {
        events: Vec<ServerEvent>,
        errors: Vec<StreamError>,
    }

    impl EventHandler for Recorder {
        fn on_message(&mut self, event: ServerEvent) {
            self.events.push(event);
        }

        fn on_error(&mut self, error: StreamError) {
            self.errors.push(error);
        }
    }

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let script = Script::Chunks(vec![content("a"), content("b")]);
        let ingestor = StreamIngestor::with_transport(FakeTransport::new(script));

        let mut recorder = Recorder::default();
        let outcome = ingestor
            .open_stream(request(), &mut recorder, &CancellationToken::new())
            .await;

        assert_eq!(outcome, StreamOutcome::Completed);
        assert_eq!(
            recorder.events,
            vec![ServerEvent::Content("a".into()), ServerEvent::Content("b".into())]
        );
        assert!(recorder.errors.is_empty());
        assert!(ingestor.transport().released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_terminator_releases_transport() {
        let ingestor = StreamIngestor::with_transport(FakeTransport::new(Script::Stall(vec![
            content("a"),
            "data: [DONE]\n".to_string(),
        ])));

        let mut recorder = Recorder::default();
        let outcome = ingestor
            .open_stream(request(), &mut recorder, &CancellationToken::new())
            .await;

        assert_eq!(outcome, StreamOutcome::Terminated);
        assert_eq!(recorder.events.len(), 1);
        assert!(ingestor.transport().released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_status_error_reported_once() {
        let ingestor = StreamIngestor::with_transport(FakeTransport::new(Script::Fail(
            StatusCode::INTERNAL_SERVER_ERROR,
        )));

        let mut recorder = Recorder::default();
        let outcome = ingestor
            .open_stream(request(), &mut recorder, &CancellationToken::new())
            .await;

        assert_eq!(outcome, StreamOutcome::Failed);
        assert!(recorder.events.is_empty());
        assert_eq!(recorder.errors.len(), 1);
        assert_eq!(recorder.errors[0].status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[tokio::test]
    async fn test_unreadable_body_reported_without_events() {
        let ingestor = StreamIngestor::with_transport(FakeTransport::new(Script::Unreadable));

        let mut recorder = Recorder::default();
        let outcome = ingestor
            .open_stream(request(), &mut recorder, &CancellationToken::new())
            .await;

        assert_eq!(outcome, StreamOutcome::Failed);
        assert!(recorder.events.is_empty());
        assert!(matches!(recorder.errors[..], [StreamError::ResourceUnavailable(_)]));
    }

    #[tokio::test]
    async fn test_cancel_after_first_event_stops_dispatch() {
        let ingestor = StreamIngestor::with_transport(FakeTransport::new(Script::Stall(vec![
            content("1"),
            content("2"),
            content("3"),
        ])));
        let cancel = CancellationToken::new();

        let mut seen = Vec::new();
        let mut errors = 0;
        let mut handler = Handlers::new(|event: ServerEvent| {
            seen.push(event);
            cancel.cancel();
        })
        .with_error(|_| errors += 1);

        let outcome = ingestor.open_stream(request(), &mut handler, &cancel).await;
        drop(handler);

        assert_eq!(outcome, StreamOutcome::Cancelled);
        assert_eq!(seen, vec![ServerEvent::Content("1".into())]);
        assert_eq!(errors, 0);
        assert!(ingestor.transport().released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cancel_before_open_skips_transport() {
        let transport = FakeTransport::new(Script::Chunks(Vec::new()));
        let ingestor = StreamIngestor::with_transport(transport);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut recorder = Recorder::default();
        let outcome = ingestor.open_stream(request(), &mut recorder, &cancel).await;

        assert_eq!(outcome, StreamOutcome::Cancelled);
        assert_eq!(ingestor.transport().opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_pull_events() {
        let ingestor = StreamIngestor::with_transport(FakeTransport::new(Script::Chunks(chunks(&[
            "data: {\"type\":\"think\",\"message\":\"hm\"}\ndata: not-json\n",
            "data: {\"type\":\"content\",\"message\":\"ok\"}",
        ]))));

        let events: Vec<ServerEvent> = ingestor
            .events(request())
            .await
            .unwrap()
            .map(|event| event.unwrap())
            .collect()
            .await;

        assert_eq!(
            events,
            vec![ServerEvent::Thinking("hm".into()), ServerEvent::Content("ok".into())]
        );
    }

    #[tokio::test]
    async fn test_concurrent_streams_are_isolated() {
        let ingestor = StreamIngestor::with_transport(FakeTransport::new(Script::Chunks(chunks(&[
            "data: {\"type\":\"content\",\"mess",
            "age\":\"x\"}\n",
        ]))));

        let (first, second) = tokio::join!(
            async { ingestor.events(request()).await.unwrap().collect::<Vec<_>>().await },
            async { ingestor.events(request()).await.unwrap().collect::<Vec<_>>().await },
        );

        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(ingestor.transport().opened.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dropping_handle_cancels_stream() {
        let transport = FakeTransport::new(Script::Stall(vec![content("1")]));
        let ingestor = StreamIngestor::with_transport(transport);
        let released = Arc::clone(&ingestor.transport().released);

        let handle = ingestor.spawn(request(), Recorder::default());
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!handle.is_finished());
        drop(handle);

        for _ in 0..50 {
            if released.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_handle_join_reports_outcome() {
        let transport = FakeTransport::new(Script::Stall(Vec::new()));
        let ingestor = StreamIngestor::with_transport(transport);

        let handle = ingestor.spawn(request(), Recorder::default());
        handle.cancel();
        let (outcome, recorder) = handle.join().await.unwrap();
        assert_eq!(outcome, StreamOutcome::Cancelled);
        assert!(recorder.events.is_empty());
    }

    #[tokio::test]
    async fn test_join_returns_accumulated_transcript() {
        let script = Script::Chunks(vec![
            "data: {\"type\":\"think\",\"message\":\"hm\"}\n".to_string(),
            content("Use "),
            content("GROUP BY."),
            "data: {\"type\":\"done\"}\n".to_string(),
        ]);
        let ingestor = StreamIngestor::with_transport(FakeTransport::new(script));

        let handle = ingestor.spawn(request(), ChatTranscript::new());
        let (outcome, transcript) = handle.join().await.unwrap();

        assert_eq!(outcome, StreamOutcome::Completed);
        assert_eq!(transcript.thinking, "hm");
        assert_eq!(transcript.content, "Use GROUP BY.");
        assert!(transcript.done);
    }
}
