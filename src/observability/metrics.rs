//! Metrics collection and exposition.
//!
//! # Metrics
//! - `edge_router_requests_total` (counter): requests by entry point, router, status
//! - `edge_router_request_duration_seconds` (histogram): latency by entry point
//! - `edge_router_rebuilds_total` (counter): pipeline builds by outcome
//! - `edge_router_config_generation` (gauge): generation of the live graph
//! - `edge_router_config_errors` (gauge): excised entries in the live graph
//! - `edge_router_server_up` (gauge): 1=healthy, 0=unhealthy, by service and server
//! - `edge_router_rate_limited_total` (counter): rejections by middleware
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op, so tests need no setup
//! - The Prometheus exporter is installed only when enabled in config

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Record a dispatched request. `router` is empty when nothing matched.
pub fn record_request(entry_point: &str, router: &str, status: u16, start: Instant) {
    metrics::counter!(
        "edge_router_requests_total",
        "entry_point" => entry_point.to_string(),
        "router" => router.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!(
        "edge_router_request_duration_seconds",
        "entry_point" => entry_point.to_string()
    )
    .record(start.elapsed().as_secs_f64());
}

pub fn record_server_health(service: &str, server: &str, up: bool) {
    metrics::gauge!(
        "edge_router_server_up",
        "service" => service.to_string(),
        "server" => server.to_string()
    )
    .set(if up { 1.0 } else { 0.0 });
}

pub fn record_rate_limited(middleware: &str) {
    metrics::counter!(
        "edge_router_rate_limited_total",
        "middleware" => middleware.to_string()
    )
    .increment(1);
}

/// Outcome is one of `published`, `unchanged`, `skipped`, `superseded`,
/// `stale`, `timeout` or `failed`.
pub fn record_rebuild(outcome: &'static str) {
    metrics::counter!("edge_router_rebuilds_total", "outcome" => outcome).increment(1);
}

pub fn record_generation(generation: u64) {
    metrics::gauge!("edge_router_config_generation").set(generation as f64);
}

pub fn record_config_errors(count: usize) {
    metrics::gauge!("edge_router_config_errors").set(count as f64);
}
