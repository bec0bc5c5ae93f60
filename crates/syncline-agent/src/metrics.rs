//! Metrics collection and export for the agent.
//!
//! Library crates record through the `metrics` facade; this module describes
//! their series and exports them in Prometheus format.

use anyhow::{Context, Result};
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names owned by the agent.
pub mod names {
    pub const REALTIME_CONNECTED: &str = "syncline_realtime_connected";
    pub const REALTIME_RECONNECTS: &str = "syncline_realtime_reconnects_total";
    pub const REALTIME_RECEIVED: &str = "syncline_realtime_received_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    use syncline_core::names as core;
    use syncline_transport::names as transport;

    metrics::describe_counter!(transport::API_REQUESTS_TOTAL, "API calls by method and outcome");
    metrics::describe_counter!(transport::API_REQUEST_RETRIES, "API call retries");
    metrics::describe_histogram!(
        transport::API_REQUEST_DURATION,
        "API call latency in seconds, including retries"
    );
    metrics::describe_counter!(core::REALTIME_DISPATCHED, "Realtime events emitted");
    metrics::describe_counter!(core::REALTIME_DROPPED, "Realtime messages dropped");
    metrics::describe_counter!(core::REALTIME_FAILED, "Realtime messages that failed to resolve");
    metrics::describe_counter!(
        core::CONNECTION_STATUS_CHANGES,
        "Connection status notifications"
    );
    metrics::describe_gauge!(names::REALTIME_CONNECTED, "Whether the realtime channel is open");
    metrics::describe_counter!(names::REALTIME_RECONNECTS, "Realtime channel reconnect attempts");
    metrics::describe_counter!(names::REALTIME_RECEIVED, "Realtime messages received");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed.
pub fn start_metrics_server(port: u16) -> Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record the realtime channel opening or closing.
pub fn set_realtime_connected(connected: bool) {
    gauge!(names::REALTIME_CONNECTED).set(if connected { 1.0 } else { 0.0 });
}

/// Record a reconnect attempt.
pub fn record_reconnect() {
    counter!(names::REALTIME_RECONNECTS).increment(1);
}

/// Record an inbound realtime message.
pub fn record_received(message_type: &str) {
    counter!(names::REALTIME_RECEIVED, "type" => message_type.to_string()).increment(1);
}
