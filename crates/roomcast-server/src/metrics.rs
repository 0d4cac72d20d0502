//! Metrics collection and export for roomcast.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use roomcast_core::RegistryStats;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
///
/// Traffic counters are emitted by the relay itself as chunks are relayed.
pub mod names {
    pub use roomcast_core::broadcast::names::{
        DELIVERIES_TOTAL, DROPPED_TOTAL, MESSAGES_BYTES, MESSAGES_TOTAL,
    };

    pub const CONNECTIONS_TOTAL: &str = "roomcast_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "roomcast_connections_active";
    pub const ROOMS_ACTIVE: &str = "roomcast_rooms";
    pub const SESSIONS_ACTIVE: &str = "roomcast_sessions_registered";
    pub const ERRORS_TOTAL: &str = "roomcast_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    // Describe metrics
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of open connections"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of chunks read from clients");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total bytes read from clients");
    metrics::describe_counter!(
        names::DELIVERIES_TOTAL,
        "Total per-peer deliveries queued"
    );
    metrics::describe_counter!(
        names::DROPPED_TOTAL,
        "Total per-peer deliveries dropped on backpressure"
    );
    metrics::describe_gauge!(names::ROOMS_ACTIVE, "Number of rooms created");
    metrics::describe_gauge!(names::SESSIONS_ACTIVE, "Number of registered sessions");
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Update registry gauges.
pub fn set_registry_stats(stats: &RegistryStats) {
    gauge!(names::ROOMS_ACTIVE).set(stats.room_count as f64);
    gauge!(names::SESSIONS_ACTIVE).set(stats.session_count as f64);
}

/// Record an error.
pub fn record_error(error_type: &str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type.to_string()).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}
