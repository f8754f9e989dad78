//! Core types and codec for the Constellation live events protocol
//!
//! This crate provides the foundation shared by the client:
//!
//! - **Types**: the tagged envelopes (`method`, `reply`, `event`) and the
//!   payload shapes of the `hello`/`live` events
//! - **Codec**: JSON encoding and decoding of envelopes
//! - **Error handling**: the error taxonomy used by every fallible operation
//! - **Observability**: tracing subscriber and OpenTelemetry bootstrap
//!
//! # Architecture
//!
//! The crate is transport-agnostic: it knows what frames look like but not
//! how they travel. `constellation-client` builds the WebSocket session and
//! the subscription orchestration on top of it.
//!
//! # Example
//!
//! ```rust
//! use constellation_core::{codec, Envelope};
//!
//! let frame = codec::encode_method("livesubscribe", serde_json::json!({"events": ["user:1:update"]}), 1).unwrap();
//!
//! match codec::decode(&frame).unwrap() {
//!     Envelope::Method(method) => assert_eq!(method.id, 1),
//!     _ => unreachable!(),
//! }
//! ```

pub mod codec;
pub mod error;
pub mod observability;
pub mod types;

pub use error::{Error, ErrorObject, Result};
pub use observability::{init_observability, shutdown_observability, ObservabilityConfig};
pub use types::{
    CorrelationId, Envelope, EventEnvelope, LiveEvents, LivePush, MethodEnvelope, ReplyEnvelope,
    HELLO_EVENT, LIVE_EVENT, LIVE_SUBSCRIBE, LIVE_UNSUBSCRIBE,
};
