//! Message dispatch and progress deduplication
//!
//! The router turns classified inbound messages into [`ClientEvent`]s. Progress
//! updates pass through a per-task dedup cache holding the last forwarded record:
//! an update is forwarded only when no record is cached or the progress moved by at
//! least the configured threshold. Terminal messages (`task_complete`,
//! `task_error`) are always forwarded and purge the cache entry.
//!
//! An update is dropped as out of order only when both it and the cached record
//! carry a server timestamp. Receipt times and server clocks are not comparable.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use crate::events::ClientEvent;
use crate::protocol::{Inbound, InboundMessage, ProgressPayload};
use crate::subscription::SubscriptionRegistry;
use crate::types::{
    ProgressRecord, StageUpdate, SystemAlert, TaskCompletion, TaskFailure, TaskId,
};

/// Tolerance for float noise in the dedup comparison
const DEDUP_EPSILON: f64 = 1e-9;

/// Stage name used when a progress update omits it
const UNKNOWN_STAGE: &str = "unknown";

/// Per-message inputs the router cannot derive itself
#[derive(Clone, Copy, Debug)]
pub struct RouteContext<'a> {
    /// Local receipt time, used for messages without a server timestamp
    pub received_at: DateTime<Utc>,
    /// Latency sample taken from this message, reported on heartbeat events
    pub latency: Option<Duration>,
    /// Registry to filter task-scoped messages against (broadcast transports only)
    pub task_filter: Option<&'a SubscriptionRegistry>,
}

impl<'a> RouteContext<'a> {
    /// Context with no latency sample and no filtering
    pub fn received_at(received_at: DateTime<Utc>) -> Self {
        Self {
            received_at,
            latency: None,
            task_filter: None,
        }
    }
}

/// What happened to a routed message
#[derive(Clone, Debug, PartialEq)]
pub enum Routed {
    /// Deliver this event to consumers
    Forward(ClientEvent),
    /// Progress moved less than the dedup threshold
    Suppressed,
    /// Progress update older than the cached record
    OutOfOrder,
    /// Task-scoped message for a task nobody subscribed to
    Filtered,
    /// Message type this client does not handle
    Ignored,
}

/// Last forwarded update for one task
#[derive(Clone, Debug)]
struct CachedProgress {
    record: ProgressRecord,
    server_timestamp: Option<DateTime<Utc>>,
}

/// Classifier and dedup cache
#[derive(Clone, Debug)]
pub struct MessageRouter {
    threshold: f64,
    last_forwarded: HashMap<TaskId, CachedProgress>,
}

impl MessageRouter {
    /// Create a router that forwards progress changes of at least `threshold` points
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            last_forwarded: HashMap::new(),
        }
    }

    /// Last forwarded progress record for a task
    pub fn cached(&self, task_id: &str) -> Option<&ProgressRecord> {
        self.last_forwarded.get(task_id).map(|cached| &cached.record)
    }

    /// Number of tasks with a cached record
    pub fn cached_tasks(&self) -> usize {
        self.last_forwarded.len()
    }

    /// Forget every cached record
    pub fn clear(&mut self) {
        self.last_forwarded.clear();
    }

    /// Route one inbound message
    pub fn route(&mut self, inbound: Inbound, ctx: RouteContext<'_>) -> Routed {
        if let (Some(registry), Some(task_id)) = (ctx.task_filter, inbound.message.task_id())
            && registry.has_tasks()
            && !registry.contains_task(task_id)
        {
            tracing::trace!(task_id, kind = inbound.message.type_name(), "Filtered unsubscribed task");
            return Routed::Filtered;
        }

        let timestamp = inbound.timestamp.unwrap_or(ctx.received_at);
        let event = match inbound.message {
            InboundMessage::ProgressUpdate(payload) => {
                return self.route_progress(payload, inbound.timestamp, ctx.received_at);
            }
            InboundMessage::TaskComplete(payload) => {
                let task_id = TaskId::from(payload.task_id);
                self.purge(&task_id);
                ClientEvent::TaskComplete(TaskCompletion {
                    task_id,
                    total_duration: payload.total_duration,
                    final_progress: payload.final_progress,
                    timestamp,
                })
            }
            InboundMessage::TaskError(payload) => {
                let task_id = TaskId::from(payload.task_id);
                self.purge(&task_id);
                ClientEvent::TaskError(TaskFailure {
                    task_id,
                    error: payload.error,
                    current_stage: payload.current_stage,
                    timestamp,
                })
            }
            InboundMessage::StageUpdate(payload, data) => ClientEvent::StageUpdate(StageUpdate {
                task_id: payload.task_id.into(),
                stage: payload.stage,
                progress: payload.progress.map(clamp_percent),
                data,
                timestamp,
            }),
            InboundMessage::Connected(data) => ClientEvent::ServerConnected { data, timestamp },
            InboundMessage::SystemAlert(data) => ClientEvent::SystemAlert(system_alert(data, timestamp)),
            InboundMessage::Heartbeat(_) => ClientEvent::Heartbeat {
                latency: ctx.latency,
                timestamp,
            },
            InboundMessage::DashboardUpdate(data) => {
                ClientEvent::DashboardUpdate { data, timestamp }
            }
            InboundMessage::Error(message) => ClientEvent::Error { message, timestamp },
            InboundMessage::Unrecognized(kind) => {
                tracing::debug!(kind = %kind, "Ignoring unrecognized message type");
                return Routed::Ignored;
            }
        };
        Routed::Forward(event)
    }

    fn route_progress(
        &mut self,
        payload: ProgressPayload,
        server_timestamp: Option<DateTime<Utc>>,
        received_at: DateTime<Utc>,
    ) -> Routed {
        let record = ProgressRecord {
            task_id: TaskId::from(payload.task_id),
            progress_percent: clamp_percent(payload.progress),
            current_stage: payload
                .current_stage
                .unwrap_or_else(|| UNKNOWN_STAGE.to_string()),
            eta_seconds: payload.eta_seconds,
            speed_bytes_per_sec: payload.average_speed_bps,
            stage_breakdown: payload
                .stages
                .into_iter()
                .map(|(stage, entry)| (stage, clamp_percent(entry.percentage)))
                .collect(),
            timestamp: server_timestamp.unwrap_or(received_at),
        };

        if let Some(cached) = self.last_forwarded.get(&record.task_id) {
            if let (Some(previous), Some(current)) = (cached.server_timestamp, server_timestamp)
                && current < previous
            {
                tracing::debug!(
                    task_id = %record.task_id,
                    cached = %previous,
                    received = %current,
                    "Dropping out-of-order progress update"
                );
                return Routed::OutOfOrder;
            }
            let delta = (record.progress_percent - cached.record.progress_percent).abs();
            if delta < self.threshold - DEDUP_EPSILON {
                tracing::debug!(
                    task_id = %record.task_id,
                    progress = record.progress_percent,
                    delta,
                    "Suppressed progress update below threshold"
                );
                return Routed::Suppressed;
            }
        }

        self.last_forwarded.insert(
            record.task_id.clone(),
            CachedProgress {
                record: record.clone(),
                server_timestamp,
            },
        );
        Routed::Forward(ClientEvent::ProgressUpdate(record))
    }

    fn purge(&mut self, task_id: &TaskId) {
        if self.last_forwarded.remove(task_id).is_some() {
            tracing::debug!(task_id = %task_id, "Purged dedup cache entry");
        }
    }
}

fn clamp_percent(value: f64) -> f64 {
    value.clamp(0.0, 100.0)
}

fn system_alert(data: Value, timestamp: DateTime<Utc>) -> SystemAlert {
    let level = data
        .get("level")
        .or_else(|| data.get("severity"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let message = data
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| data.as_str().map(str::to_string))
        .unwrap_or_default();
    SystemAlert {
        level,
        message,
        data,
        timestamp,
    }
}
