//! Stream a tutoring answer to the terminal.
//!
//! Run with:
//! ```bash
//! export TUTOR_STREAM_TOKEN="your-token"
//! export TUTOR_STREAM_BASE_URL="http://localhost:8080/api/v1"   # optional
//! RUST_LOG=tutor_stream=debug cargo run --example chat_stream -- "What is a LEFT JOIN?"
//! ```
//!
//! Press Ctrl-C to stop the stream early.

use std::io::Write;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tutor_stream::chat::ChatRequest;
use tutor_stream::client::Handlers;
use tutor_stream::model::{ServerEvent, StreamOutcome};
use tutor_stream::options::TransportOptions;
use tutor_stream::stream::StreamIngestor;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let token = std::env::var("TUTOR_STREAM_TOKEN")
        .expect("TUTOR_STREAM_TOKEN environment variable must be set");
    let question = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "Explain the difference between WHERE and HAVING.".to_string());

    let ingestor = StreamIngestor::new(TransportOptions::from_env()?)?;
    let request = ChatRequest::new(question).into_stream_request(Some(token.into()))?;

    // Stop on Ctrl-C
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let mut handler = Handlers::new(|event: ServerEvent| match event {
        ServerEvent::Thinking(text) => eprint!("{}", text),
        ServerEvent::Content(text) => {
            print!("{}", text);
            let _ = std::io::stdout().flush();
        }
        ServerEvent::Tip(tip) => {
            if let Some(seconds) = tip.total_time {
                println!("\n\n=== Generated in {:.2}s ===", seconds);
            }
        }
        ServerEvent::Done => println!("\n\n=== Stream Complete ==="),
        ServerEvent::Unknown { .. } => {}
    })
    .with_error(|error| eprintln!("\nError in stream: {}", error));

    match ingestor.open_stream(request, &mut handler, &cancel).await {
        StreamOutcome::Cancelled => eprintln!("\nstopped"),
        StreamOutcome::Failed => std::process::exit(1),
        StreamOutcome::Completed | StreamOutcome::Terminated => {}
    }

    Ok(())
}
