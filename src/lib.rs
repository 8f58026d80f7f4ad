//! # tutor-stream - streaming AI tutoring content
//!
//! A small async library that streams AI-generated tutoring content (answers,
//! reasoning, generation statistics) from a course platform backend over
//! Server-Sent Events.
//!
//! ## Features
//! - Async-first, tokio compatible
//! - Incremental SSE decoding that tolerates any chunking, including split
//!   UTF-8 characters
//! - Callback, pull-based and background-task APIs over one decoder
//! - Cooperative cancellation that releases the connection
//! - Pluggable transport; reqwest over HTTP by default
//!
//! ## Architecture
//!
//! - **`Transport`**: opens the byte stream for a request (`HttpTransport`)
//! - **`SseDecoder`**: turns bytes into `ServerEvent`s, one per `data:` line
//! - **`StreamIngestor`**: drives a transport and decoder for each invocation
//! - **`EventHandler`**: receives events and at most one error
//!
//! ## Example
//! ```no_run
//! use tutor_stream::chat::{self, ChatRequest};
//! use tutor_stream::options::TransportOptions;
//! use tutor_stream::stream::StreamIngestor;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let ingestor = StreamIngestor::new(TransportOptions::from_env()?)?;
//!
//!     let request = ChatRequest::new("Summarise this section on indexes.");
//!     let transcript = chat::collect(&ingestor, request, Some("your-token".into())).await?;
//!
//!     println!("{}", transcript.content);
//!     if let Some(seconds) = transcript.total_time() {
//!         println!("generated in {:.2}s", seconds);
//!     }
//!     Ok(())
//! }
//! ```

pub mod chat;
pub mod client;
pub mod http;
pub mod model;
pub mod options;
pub mod sse;
pub mod stream;

// Re-exports for convenience
pub use client::{EventHandler, Handlers, StreamError, Transport};
pub use http::HttpTransport;
pub use model::{EventKind, ServerEvent, StreamOutcome, StreamRequest, TipInfo};
pub use stream::{StreamHandle, StreamIngestor};
