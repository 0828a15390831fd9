//! Liveness monitoring for the socket transport
//!
//! The monitor itself owns no timer: the client's event loop ticks it every
//! `interval`. On each tick the monitor first checks for staleness and only then
//! hands back a ping to send. Any inbound traffic, not just pongs, counts as proof of
//! life, which is what catches NAT-dropped connections that never emit a close.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::Instant;

use crate::config::HeartbeatConfig;
use crate::protocol::OutboundMessage;

/// Outcome of a heartbeat tick
#[derive(Clone, Debug, PartialEq)]
pub enum HeartbeatTick {
    /// Connection looks alive; send this ping
    Ping(OutboundMessage),
    /// No inbound traffic within the stale threshold
    Stale {
        /// Time since the last inbound message
        silent_for: Duration,
    },
}

/// Tracks inbound traffic and decides when a connection is dead
#[derive(Clone, Debug)]
pub struct HeartbeatMonitor {
    interval: Duration,
    stale_threshold: Duration,
    last_inbound: Instant,
    pings_sent: u64,
}

impl HeartbeatMonitor {
    /// Create a monitor that considers `now` the last sign of life
    pub fn new(config: &HeartbeatConfig, now: Instant) -> Self {
        Self {
            interval: config.interval,
            stale_threshold: config.stale_threshold,
            last_inbound: now,
            pings_sent: 0,
        }
    }

    /// Ping interval
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Note that a message arrived
    pub fn record_inbound(&mut self, now: Instant) {
        self.last_inbound = now;
    }

    /// Restart the silence window, e.g. right after a connection opens
    pub fn reset(&mut self, now: Instant) {
        self.last_inbound = now;
        self.pings_sent = 0;
    }

    /// Time since the last inbound message
    pub fn silent_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_inbound)
    }

    /// Check staleness and produce the next ping
    pub fn tick(&mut self, now: Instant, wall_clock: DateTime<Utc>) -> HeartbeatTick {
        let silent_for = self.silent_for(now);
        if silent_for > self.stale_threshold {
            return HeartbeatTick::Stale { silent_for };
        }
        self.pings_sent += 1;
        HeartbeatTick::Ping(OutboundMessage::heartbeat(wall_clock))
    }

    /// Pings handed out since the last reset
    pub fn pings_sent(&self) -> u64 {
        self.pings_sent
    }
}
