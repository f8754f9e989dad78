//! Channel naming rules
//!
//! Two rules apply to names passed to `subscribe`:
//!
//! - The four lifecycle signal names are reserved and never sent to the
//!   server.
//! - Legacy stream notifications `chat:<id>:StartStreaming` and
//!   `chat:<id>:StopStreaming` (any case) are carried by the server on
//!   `channel:<id>:update`. The rewrite only affects which wire channel is
//!   subscribed; listeners stay registered under the name they used.

use std::borrow::Cow;

/// Lifecycle signal names that can never be wire channels
pub const RESERVED_CHANNELS: [&str; 4] = ["connected", "reconnecting", "disconnected", "error"];

/// Whether `name` is a reserved lifecycle signal name
pub fn is_reserved(name: &str) -> bool {
    RESERVED_CHANNELS.contains(&name)
}

/// Wire channel subscribed for interest in `name`
///
/// # Examples
///
/// ```rust
/// use constellation_client::resolve_channel;
///
/// assert_eq!(resolve_channel("chat:7:StartStreaming"), "channel:7:update");
/// assert_eq!(resolve_channel("user:1:update"), "user:1:update");
/// ```
pub fn resolve_channel(name: &str) -> Cow<'_, str> {
    match streaming_alias_id(name) {
        Some(id) => Cow::Owned(format!("channel:{}:update", id)),
        None => Cow::Borrowed(name),
    }
}

/// Numeric id of a `chat:<id>:(Start|Stop)Streaming` name
fn streaming_alias_id(name: &str) -> Option<&str> {
    let mut parts = name.split(':');
    let (prefix, id, suffix) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(prefix), Some(id), Some(suffix), None) => (prefix, id, suffix),
        _ => return None,
    };

    let is_stream_event =
        suffix.eq_ignore_ascii_case("startstreaming") || suffix.eq_ignore_ascii_case("stopstreaming");

    if prefix.eq_ignore_ascii_case("chat")
        && !id.is_empty()
        && id.bytes().all(|b| b.is_ascii_digit())
        && is_stream_event
    {
        Some(id)
    } else {
        None
    }
}
