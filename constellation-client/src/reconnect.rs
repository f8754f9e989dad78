//! Reconnection strategies
//!
//! When the socket drops and auto-reconnect is on, the client asks its
//! strategy how long to wait before opening a new connection, or whether to
//! stop trying.
//!
//! # Built-in Strategies
//!
//! - **FixedDelay**: constant delay between attempts (the default, 8 seconds)
//! - **ExponentialBackoff**: doubling delays up to a cap, optional jitter
//! - **NoReconnect**: stay disconnected
//!
//! # Examples
//!
//! ```rust
//! use constellation_client::{ExponentialBackoff, FixedDelay};
//! use std::time::Duration;
//!
//! // Matches the reconnect_time option
//! let fixed = FixedDelay::new(Duration::from_millis(8000));
//!
//! // 1s to 60s, at most 20 attempts
//! let backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(60))
//!     .with_max_attempts(20);
//! ```

use std::time::Duration;

/// Default delay before reconnecting
pub const DEFAULT_RECONNECT_TIME: Duration = Duration::from_millis(8000);

/// Decides when to reconnect after the socket drops
///
/// The attempt number counts consecutive failed connections since the last
/// successful handshake, starting at 0. `reset()` is called after every
/// handshake.
pub trait ReconnectionStrategy: Send + Sync {
    /// Delay before the next attempt, or `None` to give up
    fn next_delay(&mut self, attempt: u32) -> Option<Duration>;

    /// Forget accumulated state after a successful handshake
    fn reset(&mut self);
}

/// Fixed delay between attempts
#[derive(Debug, Clone)]
pub struct FixedDelay {
    delay: Duration,
    max_attempts: Option<u32>,
}

impl FixedDelay {
    /// Wait `delay` before every attempt, forever
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
        }
    }

    /// Give up after `max_attempts` consecutive failures
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

impl Default for FixedDelay {
    fn default() -> Self {
        Self::new(DEFAULT_RECONNECT_TIME)
    }
}

impl ReconnectionStrategy for FixedDelay {
    fn next_delay(&mut self, attempt: u32) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if attempt >= max {
                return None;
            }
        }
        Some(self.delay)
    }

    fn reset(&mut self) {}
}

/// Exponential backoff with optional jitter
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    min_delay: Duration,
    max_delay: Duration,
    max_attempts: Option<u32>,
    jitter: bool,
    current_attempt: u32,
}

impl ExponentialBackoff {
    /// Delays start at `min_delay`, double per attempt, and cap at `max_delay`
    pub fn new(min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            min_delay,
            max_delay,
            max_attempts: None,
            jitter: false,
            current_attempt: 0,
        }
    }

    /// Give up after `max_attempts` consecutive failures
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Add up to 25% random jitter to each delay
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), DEFAULT_RECONNECT_TIME * 4).with_jitter()
    }
}

impl ReconnectionStrategy for ExponentialBackoff {
    fn next_delay(&mut self, attempt: u32) -> Option<Duration> {
        self.current_attempt = attempt;

        if let Some(max) = self.max_attempts {
            if attempt >= max {
                return None;
            }
        }

        // min_delay * 2^attempt, saturating, capped at max_delay
        let factor = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
        let base_delay = (self.min_delay.as_millis() as u64).saturating_mul(factor);
        let delay = std::cmp::min(base_delay, self.max_delay.as_millis() as u64);

        if self.jitter {
            use rand::Rng;
            let jitter_ms = rand::thread_rng().gen_range(0..=(delay / 4));
            return Some(Duration::from_millis(delay + jitter_ms));
        }

        Some(Duration::from_millis(delay))
    }

    fn reset(&mut self) {
        self.current_attempt = 0;
    }
}

/// Never reconnect
#[derive(Debug, Clone, Copy, Default)]
pub struct NoReconnect;

impl ReconnectionStrategy for NoReconnect {
    fn next_delay(&mut self, _attempt: u32) -> Option<Duration> {
        None
    }

    fn reset(&mut self) {}
}
