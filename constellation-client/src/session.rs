//! Transport session
//!
//! A [`Session`] wraps exactly one socket. It owns correlation-id allocation
//! and the pending call table, writes method envelopes, and demultiplexes
//! inbound frames: replies settle pending calls, events are handed back to
//! the caller (the orchestrator) for routing.
//!
//! The session does not track connection state beyond the socket's own open
//! flag and never retries. Calls issued while the socket is not open fail
//! immediately with `Error::NotConnected`; nothing is queued.

use crate::request::{PendingCall, PendingCalls};
use crate::transport::{ConnectHeaders, Connector, SocketEvents, SocketHandle};
use constellation_core::{codec, Envelope, Error, EventEnvelope, Result};
use serde_json::Value;

/// One socket connection and its in-flight calls
pub struct Session {
    socket: SocketHandle,
    calls: PendingCalls,
}

impl Session {
    /// Open a socket through `connector`
    ///
    /// Returns the session and the socket's inbound events. The socket is not
    /// necessarily open yet when this returns.
    pub fn open(
        connector: &dyn Connector,
        address: &str,
        headers: &ConnectHeaders,
    ) -> Result<(Self, SocketEvents)> {
        let (socket, events) = connector.open(address, headers)?;
        Ok((Self::from_socket(socket), events))
    }

    /// Wrap an already opened socket
    pub fn from_socket(socket: SocketHandle) -> Self {
        Self {
            socket,
            calls: PendingCalls::new(),
        }
    }

    /// True iff the underlying socket is open
    pub fn is_open(&self) -> bool {
        self.socket.is_open()
    }

    /// Issue a method call
    ///
    /// The envelope is written before this returns; the returned handle
    /// settles when the matching reply arrives.
    ///
    /// # Errors
    ///
    /// `Error::NotConnected` if the socket is not open. No id is consumed and
    /// nothing is written in that case.
    pub fn call(&self, method: &str, params: Value) -> Result<PendingCall> {
        if !self.is_open() {
            return Err(Error::NotConnected);
        }

        let (id, pending) = self.calls.register();
        let sent = codec::encode_method(method, params, id).and_then(|frame| self.socket.send(frame));

        if let Err(e) = sent {
            self.calls.forget(id);
            return Err(e);
        }

        tracing::debug!(method = %method, id = id, "Method sent");
        Ok(pending)
    }

    /// Process one inbound frame
    ///
    /// Replies settle their pending call and yield `None`. Events are
    /// returned for the caller to route. Malformed frames, stray method
    /// envelopes, and replies with unknown ids are dropped.
    pub fn handle_incoming(&self, raw: &str) -> Option<EventEnvelope> {
        let envelope = match codec::decode(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!(error = %e, "Dropping malformed frame");
                return None;
            }
        };

        match envelope {
            Envelope::Reply(reply) => {
                let id = reply.id;
                if !self.calls.complete(id, reply.into_result()) {
                    tracing::debug!(id = id, "Ignoring reply for unknown call");
                }
                None
            }
            Envelope::Event(event) => Some(event),
            Envelope::Method(method) => {
                tracing::warn!(method = %method.method, "Ignoring method envelope from server");
                None
            }
        }
    }

    /// Number of calls awaiting a reply
    pub fn pending_count(&self) -> usize {
        self.calls.pending_count()
    }

    /// Close the socket and reject every pending call with `TransportClosed`
    ///
    /// Idempotent.
    pub fn close(&self) {
        self.socket.close();
        self.teardown();
    }

    /// Reject every pending call after the socket went away
    pub(crate) fn teardown(&self) {
        self.calls.fail_all(Error::TransportClosed);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
