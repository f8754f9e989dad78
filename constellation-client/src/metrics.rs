//! Client metrics definitions
//!
//! OpenTelemetry instruments recorded by the client when the builder carries
//! an observability configuration. They are exported through whatever meter
//! provider is installed globally (see `constellation_core::init_observability`).
//!
//! # Metrics Collected
//!
//! - **connection_state**: current connection state (gauge)
//! - **calls_total**: method calls settled, by method and status (counter)
//! - **call_duration**: time from send to settlement (histogram)
//! - **errors_total**: errors by kind (counter)
//! - **reconnection_attempts**: reconnects started (counter)
//! - **handshakes_total**: `hello` greetings received (counter)
//! - **live_events_received**: channel pushes received (counter)

use crate::connection_state::ConnectionState;
use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Histogram, Meter},
    KeyValue,
};

/// Client metrics for monitoring
pub struct ClientMetrics {
    /// Connection state (0=disconnected, 1=connecting, 2=connected)
    pub connection_state: Gauge<i64>,
    /// Method calls settled
    pub calls_total: Counter<u64>,
    /// Call duration in seconds
    pub call_duration: Histogram<f64>,
    /// Errors encountered
    pub errors_total: Counter<u64>,
    /// Reconnects started
    pub reconnection_attempts: Counter<u64>,
    /// Handshake greetings received
    pub handshakes_total: Counter<u64>,
    /// Channel pushes received
    pub live_events_received: Counter<u64>,
}

impl ClientMetrics {
    /// Create metrics on the global meter named after the service
    pub fn new(service_name: impl Into<String>) -> Self {
        let name: &'static str = Box::leak(service_name.into().into_boxed_str());
        let meter = global::meter(name);
        Self::new_with_meter(&meter)
    }

    /// Create metrics on a specific meter
    pub fn new_with_meter(meter: &Meter) -> Self {
        Self {
            connection_state: meter
                .i64_gauge("constellation.client.connection.state")
                .with_description("Connection state (0=disconnected, 1=connecting, 2=connected)")
                .build(),
            calls_total: meter
                .u64_counter("constellation.client.calls.total")
                .with_description("Total number of method calls settled")
                .build(),
            call_duration: meter
                .f64_histogram("constellation.client.call.duration")
                .with_description("Method call duration in seconds")
                .build(),
            errors_total: meter
                .u64_counter("constellation.client.errors.total")
                .with_description("Total number of errors encountered")
                .build(),
            reconnection_attempts: meter
                .u64_counter("constellation.client.reconnection.attempts")
                .with_description("Total number of reconnection attempts")
                .build(),
            handshakes_total: meter
                .u64_counter("constellation.client.handshakes.total")
                .with_description("Total number of handshake greetings received")
                .build(),
            live_events_received: meter
                .u64_counter("constellation.client.live_events.received")
                .with_description("Total number of channel pushes received")
                .build(),
        }
    }

    /// Update connection state
    pub fn update_connection_state(&self, state: ConnectionState) {
        self.connection_state.record(state.as_gauge(), &[]);
    }

    /// Record a settled call
    pub fn record_call(&self, method: &str, status: &str, duration_secs: f64) {
        let attributes = &[
            KeyValue::new("method", method.to_string()),
            KeyValue::new("status", status.to_string()),
        ];
        self.calls_total.add(1, attributes);
        self.call_duration.record(duration_secs, attributes);
    }

    /// Record an error
    pub fn record_error(&self, error_type: &str) {
        let attributes = &[KeyValue::new("error_type", error_type.to_string())];
        self.errors_total.add(1, attributes);
    }

    /// Record a reconnection attempt
    pub fn record_reconnection_attempt(&self) {
        self.reconnection_attempts.add(1, &[]);
    }

    /// Record a handshake greeting
    pub fn record_handshake(&self) {
        self.handshakes_total.add(1, &[]);
    }

    /// Record a channel push
    pub fn record_live_event(&self, channel: &str) {
        let attributes = &[KeyValue::new("channel", channel.to_string())];
        self.live_events_received.add(1, attributes);
    }
}
