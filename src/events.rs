//! Consumer-facing events and the callback bus
//!
//! Consumers register handlers per [`EventKind`] with
//! [`ProgressClient::on`](crate::ProgressClient::on). Handlers for one kind run in
//! registration order. A handler that panics is caught and logged; the remaining
//! handlers and later events are unaffected.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::types::{
    ProgressRecord, StageUpdate, SystemAlert, TaskCompletion, TaskFailure, TransportKind,
};

/// Event type a handler can be registered for
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A transport was established
    Connected,
    /// The transport went away (explicit disconnect or failure)
    Disconnected,
    /// A reconnect attempt was scheduled
    Reconnecting,
    /// Reconnect budget exhausted
    ConnectionError,
    /// Server hello (`connected` message)
    ServerConnected,
    /// Task progress
    ProgressUpdate,
    /// Task stage transition
    StageUpdate,
    /// Task finished
    TaskComplete,
    /// Task failed
    TaskError,
    /// System-wide notice
    SystemAlert,
    /// Heartbeat reply
    Heartbeat,
    /// Polled status snapshot
    DashboardUpdate,
    /// Error reported by the server
    Error,
}

impl EventKind {
    /// Every kind, in declaration order
    pub const ALL: [EventKind; 13] = [
        EventKind::Connected,
        EventKind::Disconnected,
        EventKind::Reconnecting,
        EventKind::ConnectionError,
        EventKind::ServerConnected,
        EventKind::ProgressUpdate,
        EventKind::StageUpdate,
        EventKind::TaskComplete,
        EventKind::TaskError,
        EventKind::SystemAlert,
        EventKind::Heartbeat,
        EventKind::DashboardUpdate,
        EventKind::Error,
    ];

    /// Wire/diagnostic name
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Connected => "connected",
            EventKind::Disconnected => "disconnected",
            EventKind::Reconnecting => "reconnecting",
            EventKind::ConnectionError => "connection_error",
            EventKind::ServerConnected => "server_connected",
            EventKind::ProgressUpdate => "progress_update",
            EventKind::StageUpdate => "stage_update",
            EventKind::TaskComplete => "task_complete",
            EventKind::TaskError => "task_error",
            EventKind::SystemAlert => "system_alert",
            EventKind::Heartbeat => "heartbeat",
            EventKind::DashboardUpdate => "dashboard_update",
            EventKind::Error => "error",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "pong" {
            return Ok(EventKind::Heartbeat);
        }
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown event type '{s}'"))
    }
}

/// Event delivered to consumers
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// A transport was established
    Connected {
        /// Transport in use
        transport: TransportKind,
    },
    /// The transport went away
    Disconnected {
        /// Why
        reason: String,
    },
    /// A reconnect attempt was scheduled
    Reconnecting {
        /// Zero-based attempt index
        attempt: u32,
        /// Delay before the attempt
        delay: Duration,
    },
    /// Reconnect budget exhausted; `connect()` must be called to resume
    ConnectionError {
        /// Description of the last failure
        message: String,
        /// Failed attempts counted
        attempts: u32,
    },
    /// Server hello
    ServerConnected {
        /// Raw payload
        data: serde_json::Value,
        /// Server timestamp or receipt time
        timestamp: DateTime<Utc>,
    },
    /// Task progress (deduplicated)
    ProgressUpdate(ProgressRecord),
    /// Task stage transition
    StageUpdate(StageUpdate),
    /// Task finished
    TaskComplete(TaskCompletion),
    /// Task failed
    TaskError(TaskFailure),
    /// System-wide notice
    SystemAlert(SystemAlert),
    /// Heartbeat reply, exposed for diagnostics
    Heartbeat {
        /// Latency sample derived from the reply, if it carried a timestamp
        latency: Option<Duration>,
        /// Server timestamp or receipt time
        timestamp: DateTime<Utc>,
    },
    /// Polled status snapshot
    DashboardUpdate {
        /// Raw status body
        data: serde_json::Value,
        /// Server timestamp or receipt time
        timestamp: DateTime<Utc>,
    },
    /// Error reported by the server
    Error {
        /// Error text
        message: String,
        /// Server timestamp or receipt time
        timestamp: DateTime<Utc>,
    },
}

impl ClientEvent {
    /// Kind used to look up handlers
    pub fn kind(&self) -> EventKind {
        match self {
            ClientEvent::Connected { .. } => EventKind::Connected,
            ClientEvent::Disconnected { .. } => EventKind::Disconnected,
            ClientEvent::Reconnecting { .. } => EventKind::Reconnecting,
            ClientEvent::ConnectionError { .. } => EventKind::ConnectionError,
            ClientEvent::ServerConnected { .. } => EventKind::ServerConnected,
            ClientEvent::ProgressUpdate(_) => EventKind::ProgressUpdate,
            ClientEvent::StageUpdate(_) => EventKind::StageUpdate,
            ClientEvent::TaskComplete(_) => EventKind::TaskComplete,
            ClientEvent::TaskError(_) => EventKind::TaskError,
            ClientEvent::SystemAlert(_) => EventKind::SystemAlert,
            ClientEvent::Heartbeat { .. } => EventKind::Heartbeat,
            ClientEvent::DashboardUpdate { .. } => EventKind::DashboardUpdate,
            ClientEvent::Error { .. } => EventKind::Error,
        }
    }
}

/// Token returned by `on()` and accepted by `off()`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Handler callback type
pub type EventHandler = Arc<dyn Fn(&ClientEvent) + Send + Sync>;

type HandlerList = Vec<(HandlerId, EventHandler)>;

/// Ordered handler lists per event kind
///
/// Emission snapshots the list before calling out, so handlers may register or
/// remove handlers (including themselves) without deadlocking.
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<EventKind, HandlerList>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: HashMap<EventKind, usize> = self
            .read()
            .iter()
            .map(|(kind, list)| (*kind, list.len()))
            .collect();
        f.debug_struct("EventBus").field("handlers", &counts).finish()
    }
}

impl EventBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler for `kind`
    pub fn on(&self, kind: EventKind, handler: EventHandler) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.write().entry(kind).or_default().push((id, handler));
        id
    }

    /// Remove a handler; returns false if it was not registered for `kind`
    pub fn off(&self, kind: EventKind, id: HandlerId) -> bool {
        let mut handlers = self.write();
        let Some(list) = handlers.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        before != list.len()
    }

    /// Number of handlers registered for `kind`
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.read().get(&kind).map_or(0, Vec::len)
    }

    /// Remove every handler
    pub fn clear(&self) {
        self.write().clear();
    }

    /// Call every handler registered for the event's kind, isolating panics
    ///
    /// Returns the number of handlers that panicked.
    pub fn emit(&self, event: &ClientEvent) -> usize {
        let kind = event.kind();
        let snapshot: Vec<EventHandler> = match self.read().get(&kind) {
            Some(list) => list.iter().map(|(_, h)| Arc::clone(h)).collect(),
            None => return 0,
        };

        let mut failures = 0;
        for (index, handler) in snapshot.iter().enumerate() {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(event))) {
                failures += 1;
                tracing::error!(
                    event = %kind,
                    handler_index = index,
                    panic = panic_message(panic.as_ref()),
                    "Event handler panicked"
                );
            }
        }
        failures
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<EventKind, HandlerList>> {
        // A poisoned lock only means a writer panicked mid-push; the map is still usable
        self.handlers.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<EventKind, HandlerList>> {
        self.handlers.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
