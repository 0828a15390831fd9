//! Subscription registry
//!
//! Holds the task ids and channels the consumer wants notifications for. The set
//! survives reconnects: after every successful negotiation the full set is replayed
//! in one `subscribe` message (socket) or encoded into the connection URL (event
//! stream), so a server that lost its state is fully resynchronized.

use serde::Serialize;
use std::collections::BTreeSet;

use crate::protocol::{OutboundMessage, SubscriptionPayload};
use crate::types::TaskId;

/// Immutable copy of the registry handed to consumers
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SubscriptionSnapshot {
    /// Subscribed task ids in sorted order
    pub task_ids: Vec<TaskId>,
    /// Subscribed channels in sorted order
    pub channels: Vec<String>,
}

/// In-memory subscription set
#[derive(Clone, Debug)]
pub struct SubscriptionRegistry {
    default_channels: Vec<String>,
    task_ids: BTreeSet<TaskId>,
    channels: BTreeSet<String>,
}

impl SubscriptionRegistry {
    /// Create a registry seeded with the default channels
    pub fn new(default_channels: Vec<String>) -> Self {
        let channels = default_channels.iter().cloned().collect();
        Self {
            default_channels,
            task_ids: BTreeSet::new(),
            channels,
        }
    }

    /// Add a task id; returns false if it was already present
    pub fn subscribe_task(&mut self, id: TaskId) -> bool {
        self.task_ids.insert(id)
    }

    /// Remove a task id; returns false if it was not present
    pub fn unsubscribe_task(&mut self, id: &str) -> bool {
        self.task_ids.remove(id)
    }

    /// Add a channel; returns false if it was already present
    pub fn subscribe_channel(&mut self, name: String) -> bool {
        self.channels.insert(name)
    }

    /// Remove a channel; returns false if it was not present
    pub fn unsubscribe_channel(&mut self, name: &str) -> bool {
        self.channels.remove(name)
    }

    /// Whether a task id is subscribed
    pub fn contains_task(&self, id: &str) -> bool {
        self.task_ids.contains(id)
    }

    /// Whether any task ids are subscribed
    pub fn has_tasks(&self) -> bool {
        !self.task_ids.is_empty()
    }

    /// Channel names in sorted order
    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.channels.iter().map(String::as_str)
    }

    /// Message carrying the entire current set, sent after every (re)connect
    pub fn replay_message(&self) -> OutboundMessage {
        OutboundMessage::Subscribe(SubscriptionPayload {
            task_ids: self.task_ids.iter().map(|id| id.0.clone()).collect(),
            channels: self.channels.iter().cloned().collect(),
        })
    }

    /// Copy of the current set
    pub fn snapshot(&self) -> SubscriptionSnapshot {
        SubscriptionSnapshot {
            task_ids: self.task_ids.iter().cloned().collect(),
            channels: self.channels.iter().cloned().collect(),
        }
    }

    /// Drop everything and return to the default channels (client disposal only)
    pub fn clear(&mut self) {
        self.task_ids.clear();
        self.channels = self.default_channels.iter().cloned().collect();
    }
}

/// Incremental `subscribe` for a single task
pub(crate) fn task_delta(id: &TaskId, subscribe: bool) -> OutboundMessage {
    let payload = SubscriptionPayload {
        task_ids: vec![id.0.clone()],
        channels: Vec::new(),
    };
    if subscribe {
        OutboundMessage::Subscribe(payload)
    } else {
        OutboundMessage::Unsubscribe(payload)
    }
}

/// Incremental `subscribe` for a single channel
pub(crate) fn channel_delta(name: &str, subscribe: bool) -> OutboundMessage {
    let payload = SubscriptionPayload {
        task_ids: Vec::new(),
        channels: vec![name.to_string()],
    };
    if subscribe {
        OutboundMessage::Subscribe(payload)
    } else {
        OutboundMessage::Unsubscribe(payload)
    }
}
