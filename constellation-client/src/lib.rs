//! Constellation live events client over WebSocket
//!
//! This crate connects to the Constellation live events service, keeps a set
//! of channel subscriptions alive across reconnects, and delivers channel
//! pushes to registered listeners.
//!
//! # Core Features
//!
//! - **Method calls**: correlated request/reply over one socket
//! - **Live subscriptions**: per-channel listeners with automatic resubscribe
//!   after every handshake
//! - **Auto-Reconnection**: fixed delay by default, pluggable strategies
//! - **Lifecycle signals**: `Connected`, `Disconnected`, `Reconnecting` and
//!   `Error` over a broadcast channel
//! - **Observability**: OpenTelemetry integration for traces and metrics
//!
//! # Layers
//!
//! - [`Session`]: one socket, its correlation ids and pending calls
//! - [`SubscriptionRegistry`]: the wire channels the server should deliver
//! - [`ConstellationClient`]: connection lifecycle, listeners, reconnects
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use constellation_client::{ClientBuilder, LifecycleEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ClientBuilder::new()
//!         .authorization("Bearer abc123")
//!         .build()?;
//!
//!     let mut lifecycle = client.lifecycle();
//!
//!     client.subscribe("user:1:update", |payload| async move {
//!         println!("Received: {}", payload);
//!     })?;
//!
//!     while let Ok(event) = lifecycle.recv().await {
//!         if let LifecycleEvent::Error(e) = event {
//!             eprintln!("Subscription failed: {}", e);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

mod channel;
mod client;
mod client_builder;
mod connection_state;
mod dispatch;
mod metrics;
mod reconnect;
mod registry;
mod request;
mod session;
pub mod transport;

pub use channel::{is_reserved, resolve_channel, RESERVED_CHANNELS};
pub use client::{ConstellationClient, LifecycleEvent, Subscription};
pub use client_builder::{ClientBuilder, ClientConfig, DEFAULT_SERVER_ADDRESS};
pub use connection_state::{ConnectionManager, ConnectionState};
pub use dispatch::{ChannelHandler, Dispatcher, HandlerId};
pub use metrics::ClientMetrics;
pub use reconnect::{
    ExponentialBackoff, FixedDelay, NoReconnect, ReconnectionStrategy, DEFAULT_RECONNECT_TIME,
};
pub use registry::SubscriptionRegistry;
pub use request::{PendingCall, PendingCalls};
pub use session::Session;
pub use transport::{ConnectHeaders, Connector, WsConnector, BOT_HEADER};
