//! Core types shared across the client

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::subscription::SubscriptionSnapshot;

/// Identifier of a background task (download, transcription, ...)
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Create a new TaskId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for TaskId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for TaskId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<&str> for TaskId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Concrete mechanism carrying messages between client and server
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Persistent bidirectional WebSocket
    Socket,
    /// Server-sent event stream
    EventStream,
    /// Timed polling of a status endpoint
    Polling,
}

impl TransportKind {
    /// Stable lowercase name used in logs and configuration
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Socket => "socket",
            TransportKind::EventStream => "event_stream",
            TransportKind::Polling => "polling",
        }
    }

    /// Whether the client can push messages (subscribe, ping) to the server
    pub fn supports_send(&self) -> bool {
        matches!(self, TransportKind::Socket)
    }

    /// Whether heartbeat pings and staleness checks apply to this transport
    pub fn uses_heartbeat(&self) -> bool {
        matches!(self, TransportKind::Socket)
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection state of a client instance
///
/// Connecting, Connected and Reconnecting are "live" states; at most one live
/// negotiation or transport exists per client at any time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "transport", rename_all = "snake_case")]
pub enum ConnectionState {
    /// No transport and no pending reconnect
    #[default]
    Disconnected,
    /// First negotiation round in flight
    Connecting,
    /// A transport is established
    Connected(TransportKind),
    /// Waiting for (or running) a reconnect attempt after a failure
    Reconnecting,
    /// Retry budget exhausted; a manual `connect()` is required
    Failed,
}

impl ConnectionState {
    /// True for Connecting, Connected and Reconnecting
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting
                | ConnectionState::Connected(_)
                | ConnectionState::Reconnecting
        )
    }

    /// True when a transport is established
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected(_))
    }

    /// Active transport, if connected
    pub fn transport(&self) -> Option<TransportKind> {
        match self {
            ConnectionState::Connected(kind) => Some(*kind),
            _ => None,
        }
    }
}

/// Progress snapshot for one task
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    /// Task this record belongs to
    pub task_id: TaskId,
    /// Overall progress percentage (0.0 to 100.0)
    pub progress_percent: f64,
    /// Name of the stage currently running
    pub current_stage: String,
    /// Estimated seconds until completion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<f64>,
    /// Average transfer speed in bytes per second
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed_bytes_per_sec: Option<f64>,
    /// Per-stage progress percentages
    #[serde(default)]
    pub stage_breakdown: BTreeMap<String, f64>,
    /// Server timestamp, or receipt time when the server sent none
    pub timestamp: DateTime<Utc>,
}

/// A task moved to another stage
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StageUpdate {
    /// Task the update belongs to
    pub task_id: TaskId,
    /// New stage name
    pub stage: String,
    /// Progress within the stage, when reported
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    /// Raw payload for fields this crate does not model
    pub data: serde_json::Value,
    /// Server timestamp or receipt time
    pub timestamp: DateTime<Utc>,
}

/// A task finished successfully
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskCompletion {
    /// Finished task
    pub task_id: TaskId,
    /// Total wall time in seconds, when reported
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_duration: Option<f64>,
    /// Last progress value, when reported
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_progress: Option<f64>,
    /// Server timestamp or receipt time
    pub timestamp: DateTime<Utc>,
}

/// A task failed
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskFailure {
    /// Failed task
    pub task_id: TaskId,
    /// Error message from the server
    pub error: String,
    /// Stage that was running when the task failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<String>,
    /// Server timestamp or receipt time
    pub timestamp: DateTime<Utc>,
}

/// System-wide notice from the server
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SystemAlert {
    /// Severity such as "info" or "warning", when given
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    /// Alert text
    pub message: String,
    /// Raw payload
    pub data: serde_json::Value,
    /// Server timestamp or receipt time
    pub timestamp: DateTime<Utc>,
}

/// Client statistics snapshot
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Statistics {
    /// Inbound messages received on any transport
    pub messages_received: u64,
    /// Inbound payloads that could not be parsed
    pub parse_errors: u64,
    /// Progress updates suppressed by deduplication
    pub updates_suppressed: u64,
    /// Exponential moving average of observed latency in milliseconds
    pub average_latency_ms: f64,
    /// Time since the current connection was established
    pub connection_uptime: Duration,
    /// Reconnect attempts scheduled since the client was created or disposed
    pub reconnect_attempts: u64,
    /// Transport currently in use
    pub current_transport: Option<TransportKind>,
}

/// Connection details snapshot
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConnectionInfo {
    /// Current state
    pub state: ConnectionState,
    /// Active transport, if any
    pub transport: Option<TransportKind>,
    /// Failures counted towards the retry budget since the last stable connection
    pub reconnect_attempt: u32,
    /// Receipt time of the last inbound message
    pub last_message_at: Option<DateTime<Utc>>,
    /// Latest latency average in milliseconds
    pub latency_ms: f64,
    /// Current subscription set
    pub subscriptions: SubscriptionSnapshot,
}
