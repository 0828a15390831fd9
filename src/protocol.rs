//! Wire format for inbound notifications and outbound control messages
//!
//! Socket frames and unnamed event-stream events carry a JSON envelope
//! `{"type": ..., "data": {...}, "timestamp": ...}`. Named event-stream events carry
//! the type in the event name and the JSON body as data. Polling responses have no
//! envelope at all and are surfaced as synthetic `dashboard_update` messages.
//!
//! Every payload is turned into an [`InboundMessage`] variant here, so the router
//! only ever matches on a closed set of types. Types this crate does not know about
//! become [`InboundMessage::Unrecognized`] rather than an error.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Numeric timestamps below this are taken as seconds, above as milliseconds
const EPOCH_MILLIS_CUTOFF: f64 = 100_000_000_000.0;

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    timestamp: Option<Value>,
}

/// Per-stage entry inside a progress update
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct StagePercent {
    /// Completion of this stage
    #[serde(default)]
    pub percentage: f64,
}

/// `progress_update` payload
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ProgressPayload {
    /// Task the update belongs to
    pub task_id: String,
    /// Overall progress (0-100)
    pub progress: f64,
    /// Stage currently running
    #[serde(default)]
    pub current_stage: Option<String>,
    /// Estimated seconds remaining
    #[serde(default)]
    pub eta_seconds: Option<f64>,
    /// Average speed in bytes per second
    #[serde(default)]
    pub average_speed_bps: Option<f64>,
    /// Per-stage breakdown
    #[serde(default)]
    pub stages: BTreeMap<String, StagePercent>,
}

/// `stage_update` payload
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct StagePayload {
    /// Task the update belongs to
    pub task_id: String,
    /// New stage name
    #[serde(alias = "current_stage")]
    pub stage: String,
    /// Progress within the stage
    #[serde(default)]
    pub progress: Option<f64>,
}

/// `task_complete` payload
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct CompletePayload {
    /// Finished task
    pub task_id: String,
    /// Total duration in seconds
    #[serde(default)]
    pub total_duration: Option<f64>,
    /// Last progress value
    #[serde(default)]
    pub final_progress: Option<f64>,
}

/// `task_error` payload
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct FailurePayload {
    /// Failed task
    pub task_id: String,
    /// Error message
    #[serde(default)]
    pub error: String,
    /// Stage that was running
    #[serde(default)]
    pub current_stage: Option<String>,
}

/// Classified inbound message
#[derive(Clone, Debug, PartialEq)]
pub enum InboundMessage {
    /// Server hello after the connection opened
    Connected(Value),
    /// Progress of a task
    ProgressUpdate(ProgressPayload),
    /// Stage transition of a task (raw payload kept alongside)
    StageUpdate(StagePayload, Value),
    /// Task finished
    TaskComplete(CompletePayload),
    /// Task failed
    TaskError(FailurePayload),
    /// System-wide notice
    SystemAlert(Value),
    /// Heartbeat reply (`heartbeat` or legacy `pong`)
    Heartbeat(Value),
    /// Polled status snapshot
    DashboardUpdate(Value),
    /// Error reported by the server
    Error(String),
    /// Type this client does not handle
    Unrecognized(String),
}

impl InboundMessage {
    /// Wire name of the message type
    pub fn type_name(&self) -> &str {
        match self {
            InboundMessage::Connected(_) => "connected",
            InboundMessage::ProgressUpdate(_) => "progress_update",
            InboundMessage::StageUpdate(..) => "stage_update",
            InboundMessage::TaskComplete(_) => "task_complete",
            InboundMessage::TaskError(_) => "task_error",
            InboundMessage::SystemAlert(_) => "system_alert",
            InboundMessage::Heartbeat(_) => "heartbeat",
            InboundMessage::DashboardUpdate(_) => "dashboard_update",
            InboundMessage::Error(_) => "error",
            InboundMessage::Unrecognized(kind) => kind,
        }
    }

    /// Task the message is scoped to, if any
    pub fn task_id(&self) -> Option<&str> {
        match self {
            InboundMessage::ProgressUpdate(p) => Some(&p.task_id),
            InboundMessage::StageUpdate(p, _) => Some(&p.task_id),
            InboundMessage::TaskComplete(p) => Some(&p.task_id),
            InboundMessage::TaskError(p) => Some(&p.task_id),
            _ => None,
        }
    }
}

/// A parsed inbound message with its timing metadata
#[derive(Clone, Debug, PartialEq)]
pub struct Inbound {
    /// Classified message
    pub message: InboundMessage,
    /// Server timestamp from the envelope or payload, if present
    pub timestamp: Option<DateTime<Utc>>,
}

/// Parse a JSON envelope received over the socket or as an unnamed SSE event
pub fn parse_envelope(text: &str) -> Result<Inbound> {
    let envelope: Envelope = serde_json::from_str(text)
        .map_err(|e| Error::MessageParse(format!("invalid envelope: {e}")))?;
    let timestamp = envelope
        .timestamp
        .as_ref()
        .and_then(parse_timestamp)
        .or_else(|| envelope.data.get("timestamp").and_then(parse_timestamp));
    let message = classify(&envelope.kind, envelope.data)?;
    Ok(Inbound { message, timestamp })
}

/// Parse a server-sent event whose name carries the message type
///
/// Events named `message` (the SSE default) or with no name are expected to carry
/// a full envelope in their data.
pub fn parse_named_event(name: &str, data: &str) -> Result<Inbound> {
    if name.is_empty() || name == "message" {
        return parse_envelope(data);
    }
    let payload: Value = if data.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(data)
            .map_err(|e| Error::MessageParse(format!("invalid '{name}' event body: {e}")))?
    };
    let timestamp = payload.get("timestamp").and_then(parse_timestamp);
    let message = classify(name, payload)?;
    Ok(Inbound { message, timestamp })
}

/// Wrap a polled status body as a synthetic `dashboard_update`
pub fn parse_poll_body(body: &str) -> Result<Inbound> {
    let payload: Value = serde_json::from_str(body)
        .map_err(|e| Error::MessageParse(format!("invalid status response: {e}")))?;
    let timestamp = payload.get("timestamp").and_then(parse_timestamp);
    Ok(Inbound {
        message: InboundMessage::DashboardUpdate(payload),
        timestamp,
    })
}

fn classify(kind: &str, data: Value) -> Result<InboundMessage> {
    let message = match kind {
        "connected" => InboundMessage::Connected(data),
        "progress_update" => {
            let payload: ProgressPayload = decode(kind, data)?;
            if !payload.progress.is_finite() {
                return Err(Error::MessageParse(format!(
                    "progress for task {} is not a finite number",
                    payload.task_id
                )));
            }
            InboundMessage::ProgressUpdate(payload)
        }
        "stage_update" => {
            let payload: StagePayload = decode(kind, data.clone())?;
            InboundMessage::StageUpdate(payload, data)
        }
        "task_complete" => InboundMessage::TaskComplete(decode(kind, data)?),
        "task_error" => InboundMessage::TaskError(decode(kind, data)?),
        "system_alert" => InboundMessage::SystemAlert(data),
        "heartbeat" | "pong" => InboundMessage::Heartbeat(data),
        "dashboard_update" => InboundMessage::DashboardUpdate(data),
        "error" => {
            let message = data
                .get("message")
                .or_else(|| data.get("error"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| data.as_str().map(str::to_string))
                .unwrap_or_else(|| data.to_string());
            InboundMessage::Error(message)
        }
        other => InboundMessage::Unrecognized(other.to_string()),
    };
    Ok(message)
}

fn decode<T: serde::de::DeserializeOwned>(kind: &str, data: Value) -> Result<T> {
    serde_json::from_value(data)
        .map_err(|e| Error::MessageParse(format!("invalid '{kind}' payload: {e}")))
}

/// Interpret a timestamp value
///
/// Accepts RFC 3339 strings, naive ISO-8601 strings (taken as UTC) and numeric
/// epoch values in seconds or milliseconds.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|naive| naive.and_utc())
            }),
        Value::Number(n) => {
            let raw = n.as_f64()?;
            if !raw.is_finite() || raw < 0.0 {
                return None;
            }
            let millis = if raw < EPOCH_MILLIS_CUTOFF {
                raw * 1000.0
            } else {
                raw
            };
            Utc.timestamp_millis_opt(millis as i64).single()
        }
        _ => None,
    }
}

/// Subscription delta or full set
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SubscriptionPayload {
    /// Task identifiers
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub task_ids: Vec<String>,
    /// Channel names
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<String>,
}

/// Ping payload
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PingPayload {
    /// Local send time
    pub timestamp: String,
    /// Set to "latency" for dedicated latency probes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probe: Option<String>,
}

/// Client-to-server control message (socket transport only)
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Add task ids and/or channels
    Subscribe(SubscriptionPayload),
    /// Remove task ids and/or channels
    Unsubscribe(SubscriptionPayload),
    /// Liveness or latency probe
    Ping(PingPayload),
}

impl OutboundMessage {
    /// Heartbeat ping stamped with the local send time
    pub fn heartbeat(now: DateTime<Utc>) -> Self {
        OutboundMessage::Ping(PingPayload {
            timestamp: now.to_rfc3339_opts(SecondsFormat::Millis, true),
            probe: None,
        })
    }

    /// Latency probe stamped with a high-resolution send time
    pub fn latency_probe(now: DateTime<Utc>) -> Self {
        OutboundMessage::Ping(PingPayload {
            timestamp: now.to_rfc3339_opts(SecondsFormat::Nanos, true),
            probe: Some("latency".to_string()),
        })
    }

    /// Serialize to the JSON text sent on the wire
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
