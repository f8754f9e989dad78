//! Subscription registry
//!
//! The set of wire channels this client currently wants. It is the source of
//! truth replayed by the bulk resubscribe after every handshake, so its order
//! is kept stable: channels are listed in the order they were first added.

/// Ordered, duplicate-free set of channel names
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionRegistry {
    channels: Vec<String>,
}

impl SubscriptionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `channel` if absent
    ///
    /// Returns true if the channel was not present before.
    pub fn add(&mut self, channel: impl Into<String>) -> bool {
        let channel = channel.into();
        if self.contains(&channel) {
            return false;
        }
        self.channels.push(channel);
        true
    }

    /// Remove `channel` if present
    ///
    /// Removing a channel that is not registered is a no-op. Returns true if
    /// the channel was present.
    pub fn remove(&mut self, channel: &str) -> bool {
        match self.channels.iter().position(|c| c == channel) {
            Some(index) => {
                self.channels.remove(index);
                true
            }
            None => false,
        }
    }

    /// Whether `channel` is registered
    pub fn contains(&self, channel: &str) -> bool {
        self.channels.iter().any(|c| c == channel)
    }

    /// Snapshot of the registered channels in insertion order
    pub fn list(&self) -> Vec<String> {
        self.channels.clone()
    }

    /// Number of registered channels
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// True if no channel is registered
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
