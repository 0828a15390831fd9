//! # progress-link
//!
//! Resilient real-time progress notifications for long-running background tasks.
//!
//! ## Design Philosophy
//!
//! progress-link is designed to be:
//! - **Transport-agnostic** - WebSocket first, server-sent events and status polling as fallbacks
//! - **Self-healing** - Heartbeats detect dead connections, exponential backoff reconnects them
//! - **Quiet** - Duplicate and out-of-order progress updates never reach consumers
//! - **Event-driven** - Consumers register handlers or read a broadcast stream
//!
//! ## Quick Start
//!
//! ```no_run
//! use progress_link::{ClientConfig, ClientEvent, ProgressClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig {
//!         socket_url: Some("wss://api.example.com/ws/progress".to_string()),
//!         stream_url: Some("https://api.example.com/sse/progress".to_string()),
//!         poll_url: Some("https://api.example.com/status".to_string()),
//!         auth_token: Some("token".to_string()),
//!         ..Default::default()
//!     };
//!
//!     let client = ProgressClient::new(config)?;
//!
//!     // Subscribe to events
//!     let mut events = client.events();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             if let ClientEvent::ProgressUpdate(record) = event {
//!                 println!("{}: {:.1}%", record.task_id, record.progress_percent);
//!             }
//!         }
//!     });
//!
//!     client.connect().await?;
//!     client.subscribe_task("task-42").await?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Client handle and its background driver
pub mod client;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Consumer-facing events and handler registry
pub mod events;
/// Heartbeat liveness monitoring
pub mod heartbeat;
/// Round-trip latency smoothing
pub mod latency;
/// Wire formats
pub mod protocol;
/// Reconnect scheduling with exponential backoff
pub mod reconnect;
/// Message routing and progress deduplication
pub mod router;
/// Task and channel subscriptions
pub mod subscription;
/// Transport negotiation and connectors
pub mod transport;
/// Core types
pub mod types;

// Re-export commonly used types
pub use client::ProgressClient;
pub use config::{ClientConfig, HeartbeatConfig, ReconnectConfig, TransportConfig};
pub use error::{Error, Result};
pub use events::{ClientEvent, EventHandler, EventKind, HandlerId};
pub use subscription::SubscriptionSnapshot;
pub use transport::{ConnectParams, Connector, InboundFrame, TransportChannel};
pub use types::{
    ConnectionInfo, ConnectionState, ProgressRecord, Statistics, StageUpdate, SystemAlert,
    TaskCompletion, TaskFailure, TaskId, TransportKind,
};
