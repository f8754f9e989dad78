//! Codec for envelope serialization and deserialization
//!
//! Thin wrappers over serde that map failures into the crate's [`Error`]
//! type. Outbound frames are always method envelopes; inbound frames may be
//! any envelope kind.
//!
//! # Examples
//!
//! ```rust
//! use constellation_core::{codec, Envelope};
//!
//! let frame = codec::encode_method("livesubscribe", serde_json::json!({"events": []}), 1).unwrap();
//! assert!(frame.contains("\"type\":\"method\""));
//!
//! let inbound = codec::decode(r#"{"type":"reply","id":1,"result":null,"error":null}"#).unwrap();
//! assert!(matches!(inbound, Envelope::Reply(_)));
//! ```

use crate::error::{Error, Result};
use crate::types::{CorrelationId, Envelope, MethodEnvelope};
use serde::Serialize;

/// Encode any serializable message to a JSON string
pub fn encode<T: Serialize>(msg: &T) -> Result<String> {
    serde_json::to_string(msg).map_err(|e| Error::Serialization(e.to_string()))
}

/// Encode a method call frame
pub fn encode_method(
    method: &str,
    params: serde_json::Value,
    id: CorrelationId,
) -> Result<String> {
    encode(&Envelope::Method(MethodEnvelope::new(method, params, id)))
}

/// Decode an inbound frame
///
/// # Errors
///
/// `Error::InvalidMessage` when the text is not JSON, is missing the `type`
/// tag, or does not match the shape of the tagged kind.
pub fn decode(data: &str) -> Result<Envelope> {
    serde_json::from_str(data).map_err(|e| Error::InvalidMessage(e.to_string()))
}

/// Decode an inbound frame delivered as binary
pub fn decode_bytes(data: &[u8]) -> Result<Envelope> {
    serde_json::from_slice(data).map_err(|e| Error::InvalidMessage(e.to_string()))
}
