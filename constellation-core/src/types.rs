//! Protocol envelope types
//!
//! Every frame exchanged with the server is a JSON object tagged by its
//! `type` field:
//!
//! 1. **method**: client → server call, correlated by `id`
//! 2. **reply**: server → client answer to a method, same `id`
//! 3. **event**: server → client push, no correlation
//!
//! Two events are meaningful to the client: `hello`, the handshake greeting
//! sent once per connection, and `live`, which carries a payload published on
//! a subscribed channel.
//!
//! # Wire Shapes
//!
//! ```text
//! {"type":"method","method":"livesubscribe","params":{"events":["user:1:update"]},"id":1}
//! {"type":"reply","id":1,"result":null,"error":null}
//! {"type":"event","event":"live","data":{"channel":"user:1:update","payload":{}}}
//! ```

use crate::error::{Error, ErrorObject, Result};
use serde::{Deserialize, Serialize};

/// Correlation identifier of a method call
///
/// Assigned by the session starting at 1; never 0.
pub type CorrelationId = u32;

/// Name of the handshake greeting event
pub const HELLO_EVENT: &str = "hello";

/// Name of the push event carrying channel payloads
pub const LIVE_EVENT: &str = "live";

/// Method adding channels to the connection's live subscriptions
pub const LIVE_SUBSCRIBE: &str = "livesubscribe";

/// Method removing channels from the connection's live subscriptions
pub const LIVE_UNSUBSCRIBE: &str = "liveunsubscribe";

/// A protocol frame, tagged by `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Envelope {
    /// Outbound method call
    Method(MethodEnvelope),
    /// Reply to a method call
    Reply(ReplyEnvelope),
    /// Server push
    Event(EventEnvelope),
}

/// Outbound method call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodEnvelope {
    /// Name of the remote method
    pub method: String,
    /// Parameter object
    pub params: serde_json::Value,
    /// Correlation id echoed back in the reply
    pub id: CorrelationId,
}

impl MethodEnvelope {
    /// Create a new method envelope
    pub fn new(method: impl Into<String>, params: serde_json::Value, id: CorrelationId) -> Self {
        Self {
            method: method.into(),
            params,
            id,
        }
    }
}

/// Reply to a method call
///
/// `result` and `error` are mutually exclusive in meaning: a populated `error`
/// always wins, otherwise `result` is the answer, including `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    /// Correlation id of the call being answered
    pub id: CorrelationId,
    /// Result value; `null` is a valid success value
    #[serde(default)]
    pub result: serde_json::Value,
    /// Error object, present when the call failed
    #[serde(default)]
    pub error: Option<ErrorObject>,
}

impl ReplyEnvelope {
    /// Successful reply
    pub fn success(id: CorrelationId, result: serde_json::Value) -> Self {
        Self {
            id,
            result,
            error: None,
        }
    }

    /// Failed reply
    pub fn failure(id: CorrelationId, error: ErrorObject) -> Self {
        Self {
            id,
            result: serde_json::Value::Null,
            error: Some(error),
        }
    }

    /// Convert the reply into the outcome of the call
    pub fn into_result(self) -> Result<serde_json::Value> {
        match self.error {
            Some(error) => Err(Error::Server(error)),
            None => Ok(self.result),
        }
    }
}

/// Server push
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Event name (`hello`, `live`, ...)
    pub event: String,
    /// Opaque event data
    #[serde(default)]
    pub data: serde_json::Value,
}

impl EventEnvelope {
    /// Create a new event envelope
    pub fn new(event: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// True for the handshake greeting
    pub fn is_hello(&self) -> bool {
        self.event == HELLO_EVENT
    }

    /// Channel push carried by a `live` event
    ///
    /// Returns `None` for other events and for `live` events whose data does
    /// not name a channel.
    pub fn live_push(&self) -> Option<LivePush> {
        if self.event != LIVE_EVENT {
            return None;
        }
        serde_json::from_value(self.data.clone()).ok()
    }
}

/// Payload published on a channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LivePush {
    /// Channel the payload was published on, as named by the server
    pub channel: String,
    /// Channel payload, passed to listeners unchanged
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Parameters of `livesubscribe` and `liveunsubscribe`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveEvents {
    /// Channel names
    pub events: Vec<String>,
}

impl LiveEvents {
    /// Parameters naming the given channels
    pub fn new(events: Vec<String>) -> Self {
        Self { events }
    }
}
