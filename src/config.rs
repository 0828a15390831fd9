//! Configuration types for progress-link

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::types::TransportKind;

/// Reconnect backoff configuration
///
/// The delay before reconnect attempt `n` (zero-based) is
/// `min(base_interval * 2^n, max_delay)`. Once `max_attempts` failures have been
/// scheduled the client gives up and enters the `Failed` state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt (default: 3000ms)
    #[serde(default = "default_base_interval", with = "duration_millis")]
    pub base_interval: Duration,

    /// Upper bound for any single delay (default: 30000ms)
    #[serde(default = "default_max_delay", with = "duration_millis")]
    pub max_delay: Duration,

    /// Failures tolerated before giving up (default: 10)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Stretch each delay by a random 0-100% (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_interval: default_base_interval(),
            max_delay: default_max_delay(),
            max_attempts: default_max_attempts(),
            jitter: false,
        }
    }
}

/// Liveness and latency probing configuration (socket transport only)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Interval between ping messages (default: 30s)
    #[serde(default = "default_heartbeat_interval", with = "duration_millis")]
    pub interval: Duration,

    /// Silence after which the connection is considered dead (default: 60s)
    ///
    /// Must be strictly longer than `interval` so a single late pong does not
    /// trigger a reconnect.
    #[serde(default = "default_stale_threshold", with = "duration_millis")]
    pub stale_threshold: Duration,

    /// Interval between dedicated latency probes (default: 60s)
    #[serde(default = "default_latency_probe_interval", with = "duration_millis")]
    pub latency_probe_interval: Duration,

    /// Smoothing factor for the latency moving average (default: 0.1)
    #[serde(default = "default_latency_alpha")]
    pub latency_alpha: f64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: default_heartbeat_interval(),
            stale_threshold: default_stale_threshold(),
            latency_probe_interval: default_latency_probe_interval(),
            latency_alpha: default_latency_alpha(),
        }
    }
}

/// Transport selection configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Priority order in which transports are attempted
    #[serde(default = "default_transport_order")]
    pub order: Vec<TransportKind>,

    /// Fall back to the next transport when one fails (default: true)
    ///
    /// When false only the first configured transport in `order` is attempted.
    #[serde(default = "default_true")]
    pub fallback: bool,

    /// Bound on each individual transport attempt (default: 5s)
    #[serde(default = "default_connect_timeout", with = "duration_millis")]
    pub connect_timeout: Duration,

    /// Interval between status fetches on the polling transport (default: 5s)
    #[serde(default = "default_poll_interval", with = "duration_millis")]
    pub poll_interval: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            order: default_transport_order(),
            fallback: true,
            connect_timeout: default_connect_timeout(),
            poll_interval: default_poll_interval(),
        }
    }
}

/// Main configuration for [`ProgressClient`](crate::ProgressClient)
///
/// Only the endpoints have no sensible default: at least one of `socket_url`,
/// `stream_url` or `poll_url` must be set. A transport whose endpoint is missing
/// is skipped during negotiation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// WebSocket endpoint, e.g. `wss://api.example.com/ws/progress`
    #[serde(default)]
    pub socket_url: Option<String>,

    /// Server-sent events endpoint, e.g. `https://api.example.com/sse/progress`
    #[serde(default)]
    pub stream_url: Option<String>,

    /// Status endpoint fetched by the polling fallback
    #[serde(default)]
    pub poll_url: Option<String>,

    /// Bearer credential appended to connection requests
    #[serde(default)]
    pub auth_token: Option<String>,

    /// Channels subscribed from the start (default: "progress", "system")
    #[serde(default = "default_channels")]
    pub channels: Vec<String>,

    /// Minimum progress change (percentage points) worth forwarding (default: 0.1)
    #[serde(default = "default_dedup_threshold")]
    pub dedup_threshold: f64,

    /// Capacity of the broadcast channel behind `events()` (default: 1000)
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Log every raw frame at debug level instead of trace
    #[serde(default)]
    pub debug: bool,

    /// Transport selection
    #[serde(default)]
    pub transports: TransportConfig,

    /// Reconnect backoff
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Heartbeat and latency probing
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            socket_url: None,
            stream_url: None,
            poll_url: None,
            auth_token: None,
            channels: default_channels(),
            dedup_threshold: default_dedup_threshold(),
            event_buffer: default_event_buffer(),
            debug: false,
            transports: TransportConfig::default(),
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Endpoint configured for a transport, if any
    pub fn endpoint(&self, kind: TransportKind) -> Option<&str> {
        match kind {
            TransportKind::Socket => self.socket_url.as_deref(),
            TransportKind::EventStream => self.stream_url.as_deref(),
            TransportKind::Polling => self.poll_url.as_deref(),
        }
    }

    /// Transports to attempt, in order, after applying the fallback preference
    pub fn negotiation_order(&self) -> Vec<TransportKind> {
        let mut order: Vec<TransportKind> = Vec::with_capacity(self.transports.order.len());
        for kind in &self.transports.order {
            if !order.contains(kind) && self.endpoint(*kind).is_some() {
                order.push(*kind);
            }
        }
        if !self.transports.fallback {
            order.truncate(1);
        }
        order
    }

    /// Check the configuration for values the client cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.negotiation_order().is_empty() {
            return Err(Error::Config {
                message: "no endpoint configured for any transport in the negotiation order"
                    .to_string(),
                key: Some("transports.order".to_string()),
            });
        }
        for kind in &self.transports.order {
            if let Some(endpoint) = self.endpoint(*kind) {
                url::Url::parse(endpoint).map_err(|e| {
                    Error::config(
                        format!("invalid {kind} endpoint '{endpoint}': {e}"),
                        endpoint_key(*kind),
                    )
                })?;
            }
        }

        let reconnect = &self.reconnect;
        if reconnect.base_interval.is_zero() {
            return Err(Error::config(
                "base interval must be > 0",
                "reconnect.base_interval",
            ));
        }
        if reconnect.max_delay < reconnect.base_interval {
            return Err(Error::config(
                "max delay must be >= base interval",
                "reconnect.max_delay",
            ));
        }

        let heartbeat = &self.heartbeat;
        if heartbeat.interval.is_zero() {
            return Err(Error::config(
                "heartbeat interval must be > 0",
                "heartbeat.interval",
            ));
        }
        if heartbeat.stale_threshold <= heartbeat.interval {
            return Err(Error::config(
                "stale threshold must be longer than the heartbeat interval",
                "heartbeat.stale_threshold",
            ));
        }
        if heartbeat.latency_probe_interval.is_zero() {
            return Err(Error::config(
                "latency probe interval must be > 0",
                "heartbeat.latency_probe_interval",
            ));
        }
        if !(heartbeat.latency_alpha > 0.0 && heartbeat.latency_alpha <= 1.0) {
            return Err(Error::config(
                "latency alpha must be in (0, 1]",
                "heartbeat.latency_alpha",
            ));
        }

        if self.transports.connect_timeout.is_zero() {
            return Err(Error::config(
                "connect timeout must be > 0",
                "transports.connect_timeout",
            ));
        }
        if self.transports.poll_interval.is_zero() {
            return Err(Error::config(
                "poll interval must be > 0",
                "transports.poll_interval",
            ));
        }
        if !self.dedup_threshold.is_finite() || self.dedup_threshold < 0.0 {
            return Err(Error::config(
                "dedup threshold must be a finite, non-negative number",
                "dedup_threshold",
            ));
        }
        if self.event_buffer == 0 {
            return Err(Error::config("event buffer must be > 0", "event_buffer"));
        }
        Ok(())
    }
}

fn endpoint_key(kind: TransportKind) -> &'static str {
    match kind {
        TransportKind::Socket => "socket_url",
        TransportKind::EventStream => "stream_url",
        TransportKind::Polling => "poll_url",
    }
}

fn default_base_interval() -> Duration {
    Duration::from_millis(3000)
}

fn default_max_delay() -> Duration {
    Duration::from_millis(30_000)
}

fn default_max_attempts() -> u32 {
    10
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_stale_threshold() -> Duration {
    Duration::from_secs(60)
}

fn default_latency_probe_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_latency_alpha() -> f64 {
    0.1
}

fn default_transport_order() -> Vec<TransportKind> {
    vec![
        TransportKind::Socket,
        TransportKind::EventStream,
        TransportKind::Polling,
    ]
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_channels() -> Vec<String> {
    vec!["progress".to_string(), "system".to_string()]
}

fn default_dedup_threshold() -> f64 {
    0.1
}

fn default_event_buffer() -> usize {
    1000
}

fn default_true() -> bool {
    true
}

// Durations are written as integer milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
