//! Metrics collection and exposition.
//!
//! # Metrics
//! - `resilient_requests_total` (counter): logical requests by service, outcome
//! - `resilient_request_duration_seconds` (histogram): end-to-end latency incl. retries
//! - `resilient_retries_total` (counter): retries by service, policy row
//! - `resilient_breaker_transitions_total` (counter): breaker transitions by target state
//! - `resilient_breaker_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `resilient_offline_queue_depth` (gauge): queued requests
//! - `resilient_service_health` (gauge): 1=healthy, 0=unhealthy
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - Prometheus exposition is opt-in via `init_metrics`

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::resilience::CircuitState;

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(service: &str, outcome: &'static str, start: Instant) {
    counter!("resilient_requests_total", "service" => service.to_string(), "outcome" => outcome)
        .increment(1);
    histogram!("resilient_request_duration_seconds", "service" => service.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_retry(service: &str, reason: &'static str) {
    counter!("resilient_retries_total", "service" => service.to_string(), "reason" => reason).increment(1);
}

pub fn record_breaker_transition(service: &str, to: CircuitState) {
    counter!(
        "resilient_breaker_transitions_total",
        "service" => service.to_string(),
        "to" => to.as_str()
    )
    .increment(1);
    gauge!("resilient_breaker_state", "service" => service.to_string()).set(to.as_gauge());
}

pub fn record_queue_depth(depth: usize) {
    gauge!("resilient_offline_queue_depth").set(depth as f64);
}

pub fn record_service_health(service: &str, healthy: bool) {
    gauge!("resilient_service_health", "service" => service.to_string()).set(if healthy { 1.0 } else { 0.0 });
}
