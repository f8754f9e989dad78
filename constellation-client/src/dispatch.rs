//! Channel listener table
//!
//! Each client owns one [`Dispatcher`]: a map from channel name to the
//! handlers listening on it. Pushes are routed by exact channel name; no
//! pattern or alias matching happens here.
//!
//! Handlers are removed by identity ([`HandlerId`]), so two listeners on the
//! same channel can come and go independently.
//!
//! # Examples
//!
//! ```rust
//! use constellation_client::Dispatcher;
//!
//! # async fn example() {
//! let dispatcher = Dispatcher::new();
//! let id = dispatcher.register("user:1:update", |payload| async move {
//!     println!("update: {}", payload);
//! });
//!
//! dispatcher.dispatch("user:1:update", serde_json::json!({"sparks": 10})).await;
//! dispatcher.unregister("user:1:update", id);
//! # }
//! ```

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Type-erased channel handler
pub type ChannelHandler =
    Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Identity of a registered handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[derive(Default)]
struct Table {
    next_id: u64,
    channels: HashMap<String, Vec<(HandlerId, ChannelHandler)>>,
}

/// Per-client dispatch table
#[derive(Clone, Default)]
pub struct Dispatcher {
    table: Arc<Mutex<Table>>,
}

impl Dispatcher {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under `channel`
    pub fn register<F, Fut>(&self, channel: impl Into<String>, handler: F) -> HandlerId
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: ChannelHandler = Arc::new(move |payload| Box::pin(handler(payload)));

        let mut table = self.table.lock();
        table.next_id += 1;
        let id = HandlerId(table.next_id);
        table
            .channels
            .entry(channel.into())
            .or_default()
            .push((id, handler));
        id
    }

    /// Remove one handler by identity
    ///
    /// Returns false if it was not registered under `channel`.
    pub fn unregister(&self, channel: &str, id: HandlerId) -> bool {
        let mut table = self.table.lock();
        let Some(handlers) = table.channels.get_mut(channel) else {
            return false;
        };

        let before = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id);
        let removed = handlers.len() != before;

        if handlers.is_empty() {
            table.channels.remove(channel);
        }
        removed
    }

    /// Number of handlers listening on `channel`
    pub fn listener_count(&self, channel: &str) -> usize {
        self.table
            .lock()
            .channels
            .get(channel)
            .map_or(0, Vec::len)
    }

    /// Channels with at least one handler
    pub fn channels(&self) -> Vec<String> {
        self.table.lock().channels.keys().cloned().collect()
    }

    /// Invoke every handler on `channel` with `payload`, in registration order
    ///
    /// Returns the number of handlers invoked.
    pub async fn dispatch(&self, channel: &str, payload: Value) -> usize {
        let handlers: Vec<ChannelHandler> = match self.table.lock().channels.get(channel) {
            Some(handlers) => handlers.iter().map(|(_, h)| Arc::clone(h)).collect(),
            None => return 0,
        };

        // The lock is released; handlers may subscribe or cancel freely
        for handler in &handlers {
            handler(payload.clone()).await;
        }
        handlers.len()
    }
}
