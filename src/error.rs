//! Error types for progress-link
//!
//! Most failures never reach the consumer: a single transport failing is handled by
//! trying the next one, a stale connection by reconnecting, and a malformed payload
//! by dropping it. Only exhaustion of the reconnect budget is surfaced, as a
//! `connection_error` event plus the `Failed` state. The variants below exist so that
//! each of those paths can be logged and classified precisely.

use std::time::Duration;
use thiserror::Error;

use crate::types::TransportKind;

/// Result type alias for progress-link operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for progress-link
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "reconnect.max_delay")
        key: Option<String>,
    },

    /// A single transport attempt failed or timed out
    #[error("{kind} transport unavailable: {reason}")]
    TransportUnavailable {
        /// Transport that was attempted
        kind: TransportKind,
        /// Why the attempt was abandoned
        reason: String,
    },

    /// Every configured transport failed during one negotiation round
    #[error("all transports exhausted ({})", format_failures(.failures))]
    AllTransportsExhausted {
        /// Per-transport failure reasons in attempt order
        failures: Vec<(TransportKind, String)>,
    },

    /// No inbound traffic within the staleness threshold
    #[error("connection stale: no inbound traffic for {}ms", .silent_for.as_millis())]
    StaleConnection {
        /// How long the transport has been silent
        silent_for: Duration,
    },

    /// Reconnect budget exhausted
    #[error("maximum reconnect attempts exceeded ({attempts})")]
    MaxReconnectExceeded {
        /// Number of failed attempts that were scheduled
        attempts: u32,
    },

    /// Inbound payload could not be interpreted
    #[error("message parse error: {0}")]
    MessageParse(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP error from the event stream or polling transport
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// WebSocket protocol or I/O error
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// Endpoint URL could not be parsed
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// Operation requires an established transport
    #[error("not connected")]
    NotConnected,

    /// A pending operation was cancelled by `disconnect()`
    #[error("operation cancelled by disconnect")]
    Cancelled,

    /// The client's background task is gone
    #[error("client is closed")]
    ClientClosed,
}

fn format_failures(failures: &[(TransportKind, String)]) -> String {
    if failures.is_empty() {
        return "no transports configured".to_string();
    }
    failures
        .iter()
        .map(|(kind, reason)| format!("{kind}: {reason}"))
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Shorthand for a configuration error tied to a key
    pub fn config(message: impl Into<String>, key: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Shorthand for a failed transport attempt
    pub fn transport(kind: TransportKind, reason: impl Into<String>) -> Self {
        Error::TransportUnavailable {
            kind,
            reason: reason.into(),
        }
    }

    /// Returns true if automatic reconnection is expected to handle this error
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::TransportUnavailable { .. }
            | Error::AllTransportsExhausted { .. }
            | Error::StaleConnection { .. }
            | Error::WebSocket(_) => true,
            Error::Network(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            // Budget spent, manual connect required
            Error::MaxReconnectExceeded { .. } => false,
            // Local problems: retrying the same input cannot help
            Error::Config { .. }
            | Error::MessageParse(_)
            | Error::Serialization(_)
            | Error::Url(_) => false,
            Error::NotConnected | Error::Cancelled | Error::ClientClosed => false,
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::WebSocket(e.to_string())
    }
}
