//! Constellation - live events over WebSocket
//!
//! This is the convenience crate that re-exports the Constellation sub-crates.
//! Use it if you want a single dependency for the whole client.
//!
//! # Architecture
//!
//! - **constellation-core**: envelope types, codec, error handling, observability
//! - **constellation-client**: socket session, subscription registry, and the
//!   reconnecting client
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use constellation::{ClientBuilder, LifecycleEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ClientBuilder::new().build()?;
//!     let mut lifecycle = client.lifecycle();
//!
//!     client.subscribe("channel:1:update", |payload| async move {
//!         println!("channel update: {}", payload);
//!     })?;
//!
//!     while let Ok(event) = lifecycle.recv().await {
//!         println!("{:?}", event);
//!     }
//!     Ok(())
//! }
//! ```

// Re-export the sub-crates under short names
pub use constellation_client as client;
pub use constellation_core as core;

// Convenience re-exports of the most commonly used types
pub use constellation_client::{
    ClientBuilder, ClientConfig, ConstellationClient, LifecycleEvent, Subscription,
};
pub use constellation_core::{Error, Result};
