//! Metrics collection and exposition.
//!
//! # Metrics
//! - `lb_selections_total` (counter): selections by load balancer and server
//! - `lb_no_server_available_total` (counter): selections that found nothing
//! - `lb_attempts_total` (counter): reported outcomes by server and outcome
//! - `lb_circuit_trips_total` (counter): circuit-tripping failures by server
//! - `lb_retries_total` (counter): retries by kind (same_server, next_server)
//! - `lb_server_reachable` (gauge): 1=reachable, 0=unreachable
//! - `lb_active_requests` (gauge): in-flight requests by server
//!
//! # Design Decisions
//! - Recorded through the `metrics` facade; no-op until a recorder is installed
//! - The embedding application decides whether to install the Prometheus recorder

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::load_balancer::server::Server;

/// Install a process-wide Prometheus recorder and return its render handle.
pub fn install_prometheus_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    tracing::info!("Prometheus metrics recorder installed");
    Ok(handle)
}

pub fn record_selection(lb: &str, server: &Server) {
    metrics::counter!(
        "lb_selections_total",
        "lb" => lb.to_string(),
        "server" => server.id()
    )
    .increment(1);
}

pub fn record_no_server_available(lb: &str) {
    metrics::counter!("lb_no_server_available_total", "lb" => lb.to_string()).increment(1);
}

pub fn record_attempt(server: &Server, success: bool) {
    let outcome = if success { "success" } else { "failure" };
    metrics::counter!(
        "lb_attempts_total",
        "server" => server.id(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_circuit_trip(server: &Server) {
    metrics::counter!("lb_circuit_trips_total", "server" => server.id()).increment(1);
}

pub fn record_retry(lb: &str, same_server: bool) {
    let kind = if same_server { "same_server" } else { "next_server" };
    metrics::counter!("lb_retries_total", "lb" => lb.to_string(), "kind" => kind).increment(1);
}

pub fn record_server_reachable(server: &Server, reachable: bool) {
    metrics::gauge!("lb_server_reachable", "server" => server.id())
        .set(if reachable { 1.0 } else { 0.0 });
}

pub fn record_active_requests(server: &Server, active: u64) {
    metrics::gauge!("lb_active_requests", "server" => server.id()).set(active as f64);
}
