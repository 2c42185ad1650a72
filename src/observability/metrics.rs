//! Metrics collection and exposition.
//!
//! # Metrics
//! - `relay_connections_accepted_total` (counter)
//! - `relay_connections_rejected_total` (counter): shed at the connection ceiling
//! - `relay_active_connections` (gauge)
//! - `relay_upstream_connect_failures_total` (counter)
//! - `relay_bytes_total` (counter): by direction
//! - `relay_direction_end_total` (counter): by direction and reason
//! - `relay_requests_total` (counter): request heads by rewrite scope
//!
//! Without an installed recorder every call here is a no-op.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::relay::{DirectionReport, RewriteScope};

/// Install the Prometheus recorder and its HTTP scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn connection_opened() {
    metrics::counter!("relay_connections_accepted_total").increment(1);
    metrics::gauge!("relay_active_connections").increment(1.0);
}

pub fn connection_closed() {
    metrics::gauge!("relay_active_connections").decrement(1.0);
}

pub fn connection_rejected() {
    metrics::counter!("relay_connections_rejected_total").increment(1);
}

pub fn upstream_connect_failed() {
    metrics::counter!("relay_upstream_connect_failures_total").increment(1);
}

pub fn request_rewritten(scope: RewriteScope) {
    metrics::counter!("relay_requests_total", "scope" => scope.as_str()).increment(1);
}

/// Record bytes and the end reason for one finished direction.
pub fn record_direction(report: &DirectionReport) {
    let direction = report.direction.as_str();
    metrics::counter!("relay_bytes_total", "direction" => direction).increment(report.bytes_written);
    metrics::counter!(
        "relay_direction_end_total",
        "direction" => direction,
        "reason" => report.end.reason()
    )
    .increment(1);
}
