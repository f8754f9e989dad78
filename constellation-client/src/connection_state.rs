//! Connection state management
//!
//! Tracks the connection lifecycle of a client and consults the reconnection
//! strategy when the socket drops.
//!
//! # Connection States
//!
//! - **Disconnected**: initial state, and the state after any socket closure
//! - **Connecting**: a socket was opened and the handshake greeting is awaited
//! - **Connected**: the server sent `hello`
//!
//! # State Transitions
//!
//! ```text
//! Disconnected → Connecting → Connected
//!       ↑             │           │
//!       └─────────────┴───────────┘   (socket closed)
//! ```
//!
//! The attempt counter handed to the strategy counts closures since the last
//! handshake, so a server that accepts sockets but never greets still backs
//! off.

use crate::reconnect::ReconnectionStrategy;
use parking_lot::Mutex;
use std::time::Duration;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket, or the last socket closed
    Disconnected,
    /// Socket opened, awaiting the handshake greeting
    Connecting,
    /// Handshake greeting received
    Connected,
}

impl ConnectionState {
    /// Numeric form used by the connection state gauge
    pub fn as_gauge(self) -> i64 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
        }
    }
}

struct Inner {
    state: ConnectionState,
    attempt: u32,
    strategy: Box<dyn ReconnectionStrategy>,
}

/// Owns the connection state and the reconnection strategy
pub struct ConnectionManager {
    inner: Mutex<Inner>,
}

impl ConnectionManager {
    /// Start disconnected with the given strategy
    pub fn new(strategy: Box<dyn ReconnectionStrategy>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: ConnectionState::Disconnected,
                attempt: 0,
                strategy,
            }),
        }
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// A socket was opened
    pub fn connecting(&self) {
        self.inner.lock().state = ConnectionState::Connecting;
    }

    /// The handshake completed; the strategy starts over
    pub fn connected(&self) {
        let mut inner = self.inner.lock();
        inner.state = ConnectionState::Connected;
        inner.attempt = 0;
        inner.strategy.reset();
    }

    /// The socket closed
    pub fn disconnected(&self) {
        self.inner.lock().state = ConnectionState::Disconnected;
    }

    /// Delay before the next attempt, or `None` to stay disconnected
    pub fn next_reconnect_delay(&self) -> Option<Duration> {
        let mut inner = self.inner.lock();
        let attempt = inner.attempt;
        let delay = inner.strategy.next_delay(attempt);
        if delay.is_some() {
            inner.attempt = attempt.saturating_add(1);
        }
        delay
    }

    /// Consecutive reconnect attempts since the last handshake
    pub fn attempt(&self) -> u32 {
        self.inner.lock().attempt
    }
}
