//! Client configuration and builder
//!
//! `ClientConfig` holds the connection options; `ClientBuilder` is the fluent
//! way to fill it in, pick a reconnection strategy, and switch on
//! observability before the client is created.
//!
//! # Examples
//!
//! ```rust,no_run
//! use constellation_client::{ClientBuilder, ExponentialBackoff};
//!
//! # async fn example() -> constellation_core::Result<()> {
//! // Defaults: production endpoint, connect immediately, reconnect after 8s
//! let client = ClientBuilder::new().build()?;
//!
//! // Authenticated, with backoff and telemetry
//! let client2 = ClientBuilder::new()
//!     .authorization("Bearer abc123")
//!     .with_reconnect(Box::new(ExponentialBackoff::default()))
//!     .with_default_observability()
//!     .service_name("chat-bot")
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use crate::client::ConstellationClient;
use crate::metrics::ClientMetrics;
use crate::reconnect::{FixedDelay, NoReconnect, ReconnectionStrategy, DEFAULT_RECONNECT_TIME};
use crate::transport::{ConnectHeaders, Connector, WsConnector};
use constellation_core::{Error, ObservabilityConfig, Result};
use std::sync::Arc;
use std::time::Duration;

/// Production live events endpoint
pub const DEFAULT_SERVER_ADDRESS: &str = "wss://constellation.beam.pro";

/// Connection options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// WebSocket endpoint
    pub server_address: String,
    /// Cookie header sent with the handshake
    pub cookie: Option<String>,
    /// Authorization header sent with the handshake
    pub authorization: Option<String>,
    /// Open a socket as soon as the client is built
    pub auto_connect: bool,
    /// Reopen the socket after it closes
    pub auto_reconnect: bool,
    /// Delay before reopening
    pub reconnect_time: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_address: DEFAULT_SERVER_ADDRESS.to_string(),
            cookie: None,
            authorization: None,
            auto_connect: true,
            auto_reconnect: true,
            reconnect_time: DEFAULT_RECONNECT_TIME,
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by environment variables
    ///
    /// - `CONSTELLATION_ADDRESS`: server address
    /// - `CONSTELLATION_COOKIE`: cookie header
    /// - `CONSTELLATION_AUTHORIZATION`: authorization header
    /// - `CONSTELLATION_RECONNECT_MS`: reconnect delay in milliseconds
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(address) = lookup("CONSTELLATION_ADDRESS") {
            config.server_address = address;
        }
        config.cookie = lookup("CONSTELLATION_COOKIE");
        config.authorization = lookup("CONSTELLATION_AUTHORIZATION");

        if let Some(raw) = lookup("CONSTELLATION_RECONNECT_MS") {
            let millis = raw.trim().parse::<u64>().map_err(|e| {
                Error::Config(format!("CONSTELLATION_RECONNECT_MS={:?}: {}", raw, e))
            })?;
            config.reconnect_time = Duration::from_millis(millis);
        }

        Ok(config)
    }

    /// Handshake headers; empty values are not sent
    pub fn headers(&self) -> ConnectHeaders {
        ConnectHeaders {
            cookie: self.cookie.clone().filter(|value| !value.is_empty()),
            authorization: self.authorization.clone().filter(|value| !value.is_empty()),
        }
    }
}

/// Builder for configuring and creating a `ConstellationClient`
pub struct ClientBuilder {
    config: ClientConfig,
    reconnect_strategy: Option<Box<dyn ReconnectionStrategy>>,
    connector: Option<Arc<dyn Connector>>,
    observability_config: Option<ObservabilityConfig>,
    service_name: Option<String>,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientBuilder {
    /// Builder starting from the default configuration
    pub fn new() -> Self {
        Self::from_config(ClientConfig::default())
    }

    /// Builder starting from an existing configuration
    pub fn from_config(config: ClientConfig) -> Self {
        Self {
            config,
            reconnect_strategy: None,
            connector: None,
            observability_config: None,
            service_name: None,
        }
    }

    /// Set the WebSocket endpoint
    pub fn server_address(mut self, address: impl Into<String>) -> Self {
        self.config.server_address = address.into();
        self
    }

    /// Send a cookie header with the handshake
    pub fn cookie(mut self, cookie: impl Into<String>) -> Self {
        self.config.cookie = Some(cookie.into());
        self
    }

    /// Send an authorization header with the handshake
    pub fn authorization(mut self, authorization: impl Into<String>) -> Self {
        self.config.authorization = Some(authorization.into());
        self
    }

    /// Connect when built (default true)
    pub fn auto_connect(mut self, enabled: bool) -> Self {
        self.config.auto_connect = enabled;
        self
    }

    /// Reconnect after the socket closes (default true)
    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.config.auto_reconnect = enabled;
        self
    }

    /// Fixed delay before reconnecting (default 8 seconds)
    pub fn reconnect_time(mut self, delay: Duration) -> Self {
        self.config.reconnect_time = delay;
        self
    }

    /// Replace the fixed reconnect delay with a custom strategy
    ///
    /// Ignored when auto-reconnect is off.
    pub fn with_reconnect(mut self, strategy: Box<dyn ReconnectionStrategy>) -> Self {
        self.reconnect_strategy = Some(strategy);
        self
    }

    /// Open sockets through a custom connector
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Enable OpenTelemetry observability with custom configuration
    pub fn with_observability(mut self, config: ObservabilityConfig) -> Self {
        self.observability_config = Some(config);
        self
    }

    /// Enable OpenTelemetry observability with default configuration
    pub fn with_default_observability(mut self) -> Self {
        self.observability_config = Some(ObservabilityConfig::default());
        self
    }

    /// Set service name for observability (used if observability is enabled)
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Create the client, connecting if `auto_connect` is set
    ///
    /// Connecting spawns the socket task, so with `auto_connect` this must be
    /// called inside a Tokio runtime.
    pub fn build(self) -> Result<ConstellationClient> {
        let metrics = if let Some(mut config) = self.observability_config {
            if let Some(name) = self.service_name {
                config.service_name = name;
            }

            constellation_core::init_observability(config.clone()).map_err(|e| {
                Error::Internal(format!("Failed to initialize observability: {}", e))
            })?;

            Some(Arc::new(ClientMetrics::new(config.service_name.clone())))
        } else {
            None
        };

        let strategy: Box<dyn ReconnectionStrategy> = if !self.config.auto_reconnect {
            Box::new(NoReconnect)
        } else {
            match self.reconnect_strategy {
                Some(strategy) => strategy,
                None => Box::new(FixedDelay::new(self.config.reconnect_time)),
            }
        };

        let connector: Arc<dyn Connector> = match self.connector {
            Some(connector) => connector,
            None => Arc::new(WsConnector::new()),
        };

        let auto_connect = self.config.auto_connect;
        let client = ConstellationClient::from_parts(self.config, connector, strategy, metrics);

        if auto_connect {
            client.connect()?;
        }

        Ok(client)
    }
}
