//! Metrics collection and exposition.
//!
//! # Metrics
//! - `relay_requests_total` (counter): relay-path requests by connection style
//! - `relay_backend_unavailable_total` (counter): backend connection refusals
//! - `relay_active_bridges` (gauge): upgraded bridges currently open
//! - `provision_attempts_total` (counter): download attempts by artifact, outcome
//! - `supervisor_restarts_total` (counter): automatic restarts by process
//! - `supervisor_state` (gauge): numeric lifecycle state by process
//!
//! Recording is a no-op until a recorder is installed, so tests need no setup.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_relay_request(style: &'static str) {
    counter!("relay_requests_total", "style" => style).increment(1);
}

pub fn record_backend_unavailable() {
    counter!("relay_backend_unavailable_total").increment(1);
}

pub fn bridge_opened() {
    gauge!("relay_active_bridges").increment(1.0);
}

pub fn bridge_closed() {
    gauge!("relay_active_bridges").decrement(1.0);
}

pub fn record_provision_attempt(artifact: &str, outcome: &'static str) {
    counter!(
        "provision_attempts_total",
        "artifact" => artifact.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_restart(process: &str) {
    counter!("supervisor_restarts_total", "process" => process.to_string()).increment(1);
}

pub fn record_supervisor_state(process: &str, code: u8) {
    gauge!("supervisor_state", "process" => process.to_string()).set(f64::from(code));
}
