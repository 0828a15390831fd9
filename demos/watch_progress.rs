//! Watch task progress from the command line
//!
//! This demo connects to a progress server, subscribes to the task ids given as
//! arguments and prints every update until Ctrl+C.
//!
//! ```text
//! PROGRESS_WS_URL=ws://localhost:8000/ws/progress \
//! PROGRESS_SSE_URL=http://localhost:8000/sse/progress \
//! PROGRESS_TOKEN=secret \
//! RUST_LOG=progress_link=debug \
//! cargo run --example watch_progress -- task-1 task-2
//! ```

use progress_link::{ClientConfig, ClientEvent, EventKind, ProgressClient};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ClientConfig {
        socket_url: std::env::var("PROGRESS_WS_URL").ok(),
        stream_url: std::env::var("PROGRESS_SSE_URL").ok(),
        poll_url: std::env::var("PROGRESS_POLL_URL").ok(),
        auth_token: std::env::var("PROGRESS_TOKEN").ok(),
        ..Default::default()
    };

    let client = ProgressClient::new(config)?;

    // Completion and failure through handlers
    client.on(EventKind::TaskComplete, |event| {
        if let ClientEvent::TaskComplete(done) = event {
            println!("[DONE] {} finished", done.task_id);
        }
    });
    client.on(EventKind::TaskError, |event| {
        if let ClientEvent::TaskError(failure) = event {
            println!("[FAIL] {}: {}", failure.task_id, failure.error);
        }
    });

    // Everything else through the broadcast channel
    let mut events = client.events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ClientEvent::ProgressUpdate(record) => {
                    println!(
                        "[PROGRESS] {} {:>5.1}% ({})",
                        record.task_id, record.progress_percent, record.current_stage
                    );
                }
                ClientEvent::StageUpdate(update) => {
                    println!("[STAGE] {} -> {}", update.task_id, update.stage);
                }
                ClientEvent::Connected { transport } => println!("[LINK] connected over {transport}"),
                ClientEvent::Reconnecting { attempt, delay } => {
                    println!("[LINK] reconnect #{} in {:?}", attempt + 1, delay);
                }
                ClientEvent::ConnectionError { message, .. } => println!("[LINK] gave up: {message}"),
                ClientEvent::SystemAlert(alert) => println!("[ALERT] {}", alert.message),
                _ => {}
            }
        }
    });

    let transport = client.connect().await?;
    tracing::info!(%transport, "Watching progress");
    for task_id in std::env::args().skip(1) {
        client.subscribe_task(task_id).await?;
    }

    tokio::signal::ctrl_c().await?;

    let stats = client.statistics().await?;
    println!(
        "received {} messages, suppressed {} duplicates, average latency {:.1}ms",
        stats.messages_received, stats.updates_suppressed, stats.average_latency_ms
    );
    client.dispose().await?;
    Ok(())
}
