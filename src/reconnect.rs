//! Reconnect scheduling with exponential backoff
//!
//! The scheduler is a pure counter: the client asks it what to do after every failed
//! negotiation, dropped transport or stale heartbeat, and sleeps for the returned
//! delay before negotiating again.
//!
//! # Example
//!
//! ```
//! use progress_link::config::ReconnectConfig;
//! use progress_link::reconnect::{ReconnectDecision, ReconnectScheduler};
//! use std::time::Duration;
//!
//! let mut scheduler = ReconnectScheduler::new(ReconnectConfig {
//!     base_interval: Duration::from_millis(3000),
//!     max_delay: Duration::from_millis(30_000),
//!     max_attempts: 3,
//!     jitter: false,
//! });
//!
//! assert_eq!(
//!     scheduler.on_failure(),
//!     ReconnectDecision::Retry { attempt: 0, delay: Duration::from_millis(3000) }
//! );
//! ```

use rand::Rng;
use std::time::Duration;

use crate::config::ReconnectConfig;

/// What to do after a connection failure
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Sleep for `delay`, then negotiate again
    Retry {
        /// Zero-based attempt index this delay belongs to
        attempt: u32,
        /// Delay before the attempt
        delay: Duration,
    },
    /// Budget exhausted; surface a fatal error (returned exactly once)
    Terminal {
        /// Failures counted before giving up
        attempts: u32,
    },
    /// Budget was already exhausted and reported; nothing more to do
    Exhausted,
}

/// Exponential backoff state for one client
#[derive(Clone, Debug)]
pub struct ReconnectScheduler {
    config: ReconnectConfig,
    attempt: u32,
    terminal_reported: bool,
}

impl ReconnectScheduler {
    /// Create a scheduler starting at attempt zero
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempt: 0,
            terminal_reported: false,
        }
    }

    /// Failures counted since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Whether the terminal decision has been handed out
    pub fn is_exhausted(&self) -> bool {
        self.terminal_reported
    }

    /// Register a failure and decide what happens next
    pub fn on_failure(&mut self) -> ReconnectDecision {
        if self.terminal_reported {
            return ReconnectDecision::Exhausted;
        }
        if self.attempt >= self.config.max_attempts {
            self.terminal_reported = true;
            tracing::error!(
                attempts = self.attempt,
                max_attempts = self.config.max_attempts,
                "Reconnect attempts exhausted"
            );
            return ReconnectDecision::Terminal {
                attempts: self.attempt,
            };
        }

        let attempt = self.attempt;
        let base = calculate_backoff(&self.config, attempt);
        let delay = if self.config.jitter {
            add_jitter(base)
        } else {
            base
        };
        self.attempt += 1;

        tracing::debug!(
            attempt,
            delay_ms = delay.as_millis(),
            "Scheduling reconnect"
        );
        ReconnectDecision::Retry { attempt, delay }
    }

    /// Start over after a connection proved stable, or on manual connect
    pub fn reset(&mut self) {
        if self.attempt > 0 {
            tracing::debug!(attempts = self.attempt, "Reconnect counter reset");
        }
        self.attempt = 0;
        self.terminal_reported = false;
    }
}

/// Delay before zero-based attempt `attempt`: `min(base * 2^attempt, max_delay)`
pub fn calculate_backoff(config: &ReconnectConfig, attempt: u32) -> Duration {
    let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    config
        .base_interval
        .checked_mul(factor)
        .unwrap_or(config.max_delay)
        .min(config.max_delay)
}

/// Add random jitter to a delay to prevent thundering herd
///
/// The result lies between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
