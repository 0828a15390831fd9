//! Round-trip latency tracking
//!
//! Keeps an exponential moving average of `now - timestamp` samples taken from ping
//! replies and from any message that carries a server timestamp. Samples are applied
//! strictly in receipt order, so when a `heartbeat` and a `pong` both carry a marker
//! the later one wins.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Exponential moving average of observed latency
#[derive(Clone, Debug)]
pub struct LatencyTracker {
    alpha: f64,
    ema_ms: f64,
    samples: u64,
    last_sample: Option<Duration>,
}

impl LatencyTracker {
    /// Create a tracker with the given smoothing factor (0 < alpha <= 1)
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha,
            ema_ms: 0.0,
            samples: 0,
            last_sample: None,
        }
    }

    /// Fold one latency sample into the average
    pub fn record(&mut self, sample: Duration) {
        let sample_ms = sample.as_secs_f64() * 1000.0;
        self.ema_ms = if self.ema_ms == 0.0 {
            sample_ms
        } else {
            self.alpha * sample_ms + (1.0 - self.alpha) * self.ema_ms
        };
        self.samples += 1;
        self.last_sample = Some(sample);
    }

    /// Record `now - sent_at`, returning the sample if it was usable
    ///
    /// Samples with a timestamp in the future (clock skew) are discarded.
    pub fn observe(&mut self, sent_at: DateTime<Utc>, now: DateTime<Utc>) -> Option<Duration> {
        let sample = (now - sent_at).to_std().ok()?;
        self.record(sample);
        Some(sample)
    }

    /// Current moving average in milliseconds (0 until the first sample)
    pub fn average_ms(&self) -> f64 {
        self.ema_ms
    }

    /// Number of samples folded in so far
    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Most recent raw sample
    pub fn last_sample(&self) -> Option<Duration> {
        self.last_sample
    }

    /// Forget all samples
    pub fn reset(&mut self) {
        self.ema_ms = 0.0;
        self.samples = 0;
        self.last_sample = None;
    }
}
