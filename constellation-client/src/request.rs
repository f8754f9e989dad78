//! Pending call tracking
//!
//! This module correlates outbound method calls with the replies that settle
//! them.
//!
//! # Call Lifecycle
//!
//! 1. **Allocate**: take the next correlation id
//! 2. **Register**: park a oneshot sender under that id
//! 3. **Send**: the session writes the method envelope
//! 4. **Wait**: the caller awaits the [`PendingCall`]
//! 5. **Settle**: the matching reply removes the entry and sends the outcome
//!
//! An entry is removed exactly once: by its reply, or by [`PendingCalls::fail_all`]
//! when the session is torn down. Replies for ids that are not pending are
//! ignored.
//!
//! # Id Allocation
//!
//! Ids start at 1 and are incremented before use. Once the counter passes
//! `u32::MAX` it restarts at 1, so ids stay representable in a 32-bit field
//! under sustained traffic and 0 is never issued. After a wrap, ids still
//! pending are skipped.
//!
//! # Timeouts
//!
//! There are none. A call whose reply never comes stays pending until the
//! session closes.

use constellation_core::{CorrelationId, Error, Result};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

type Settlement = oneshot::Sender<Result<Value>>;

#[derive(Default)]
struct Table {
    last_id: u64,
    pending: HashMap<CorrelationId, Settlement>,
}

impl Table {
    fn advance(&mut self) -> CorrelationId {
        self.last_id += 1;
        if self.last_id > u64::from(u32::MAX) {
            self.last_id = 1;
        }
        self.last_id as CorrelationId
    }
}

/// Table of in-flight method calls keyed by correlation id
#[derive(Clone, Default)]
pub struct PendingCalls {
    table: Arc<Mutex<Table>>,
}

impl PendingCalls {
    /// Create an empty table; the first id issued is 1
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an id and park a settlement entry under it
    pub fn register(&self) -> (CorrelationId, PendingCall) {
        let (tx, rx) = oneshot::channel();
        let mut table = self.table.lock();

        let mut id = table.advance();
        while table.pending.contains_key(&id) {
            id = table.advance();
        }
        table.pending.insert(id, tx);

        (id, PendingCall { id, rx })
    }

    /// Settle the call waiting on `id`
    ///
    /// Returns false if no call was waiting, which callers treat as a stale
    /// or unknown reply.
    pub fn complete(&self, id: CorrelationId, outcome: Result<Value>) -> bool {
        let entry = self.table.lock().pending.remove(&id);
        match entry {
            Some(tx) => {
                // The caller may have dropped its handle
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Drop the entry for `id` without settling it
    pub fn forget(&self, id: CorrelationId) {
        self.table.lock().pending.remove(&id);
    }

    /// Reject every pending call
    pub fn fail_all(&self, error: Error) {
        let drained: Vec<Settlement> = {
            let mut table = self.table.lock();
            table.pending.drain().map(|(_, tx)| tx).collect()
        };
        for tx in drained {
            let _ = tx.send(Err(error.clone()));
        }
    }

    /// Number of calls awaiting a reply
    pub fn pending_count(&self) -> usize {
        self.table.lock().pending.len()
    }

    #[cfg(test)]
    fn set_last_id(&self, last_id: u64) {
        self.table.lock().last_id = last_id;
    }
}

/// Awaitable outcome of a method call
///
/// Resolves to the reply's result, the reply's error object as
/// `Error::Server`, or `Error::TransportClosed` if the session went away.
/// Dropping the handle abandons the result; the entry is still cleared when
/// the reply arrives.
#[derive(Debug)]
pub struct PendingCall {
    id: CorrelationId,
    rx: oneshot::Receiver<Result<Value>>,
}

impl PendingCall {
    /// Correlation id of this call
    pub fn id(&self) -> CorrelationId {
        self.id
    }
}

impl Future for PendingCall {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|outcome| outcome.unwrap_or(Err(Error::TransportClosed)))
    }
}
