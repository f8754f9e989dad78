//! Error types for the Constellation client
//!
//! This module defines two error types:
//!
//! - **Error**: Application-level errors returned by every fallible operation
//! - **ErrorObject**: The wire-format error carried in a reply envelope
//!
//! # Error Taxonomy
//!
//! - `NotConnected`: raised locally when a method call is attempted while the
//!   socket is not open. Never sent over the wire.
//! - `Server`: the remote side rejected a method call; the `{code, message}`
//!   object from the reply is kept verbatim.
//! - `TransportClosed`: the socket dropped while the call was in flight. Every
//!   pending call of the session is rejected with it.
//!
//! The remaining variants cover local failures (bad headers, serialization,
//! malformed frames) that never reach the server.
//!
//! # Examples
//!
//! ```rust
//! use constellation_core::{Error, ErrorObject};
//!
//! let error = Error::Server(ErrorObject::new(4100, "Unknown event 'foo'"));
//! assert!(!error.is_not_connected());
//! assert_eq!(error.server_error().map(|e| e.code), Some(4100));
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for Constellation operations
pub type Result<T> = std::result::Result<T, Error>;

/// Application-level error type
///
/// `Error` is `Clone` so a single failure can be fanned out to every pending
/// call and to every lifecycle observer.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A method call was attempted while the socket was not open
    #[error("Not connected to Constellation")]
    NotConnected,

    /// The server answered a method call with an error object
    #[error("Server error: {0}")]
    Server(#[from] ErrorObject),

    /// The socket closed before the reply arrived
    #[error("Transport closed")]
    TransportClosed,

    /// WebSocket transport layer error
    ///
    /// Covers malformed addresses and handshake failures reported by the
    /// WebSocket library.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// A configured header value could not be placed on the handshake request
    #[error("Invalid header {name}: {reason}")]
    InvalidHeader {
        /// Header name
        name: &'static str,
        /// Why the value was rejected
        reason: String,
    },

    /// Serialization or deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An inbound frame was not a valid envelope
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// The channel name is one of the reserved lifecycle signal names
    #[error("Channel name is reserved for lifecycle signals: {0}")]
    ReservedChannel(String),

    /// Invalid client configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unexpected internal failure
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns true for the benign "socket not open" failure
    ///
    /// Subscription bookkeeping swallows this error: interest is recorded
    /// locally and replayed by the next bulk resubscribe.
    pub fn is_not_connected(&self) -> bool {
        matches!(self, Error::NotConnected)
    }

    /// Returns true for failures caused by the connection going away
    ///
    /// Covers `NotConnected` and `TransportClosed`: both are expected in the
    /// windows around a reconnect.
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, Error::NotConnected | Error::TransportClosed)
    }

    /// The server-supplied error object, if this error came from a reply
    pub fn server_error(&self) -> Option<&ErrorObject> {
        match self {
            Error::Server(object) => Some(object),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Error object carried in the `error` field of a reply envelope
///
/// The client treats the object as opaque: code and message are passed to the
/// caller exactly as the server sent them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorObject {
    /// Numeric error code chosen by the server
    pub code: i32,
    /// Human-readable error message
    pub message: String,
}

impl ErrorObject {
    /// Create a new error object
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ErrorObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ErrorObject {}
