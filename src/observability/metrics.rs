//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define resilience metrics (attempts, retries, breaker state, rejections)
//! - Expose Prometheus-compatible metrics endpoint
//! - Track per-resource and aggregate metrics
//!
//! # Metrics
//! - `resilience_attempts_total` (counter): operation attempts by outcome
//! - `resilience_retries_total` (counter): scheduled retries
//! - `resilience_circuit_transitions_total` (counter): by resource, target state
//! - `resilience_circuit_rejections_total` (counter): calls refused by an open breaker
//! - `resilience_circuit_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `resilience_rate_limited_total` (counter): denials by strategy
//! - `resilience_rate_limit_entries` (gauge): tracked rate-limit keys
//! - `resilience_endpoint_failovers_total` (counter): fallback moved to the next endpoint
//! - `resilience_batch_items_total` (counter): settled batch items by outcome
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - Labels are low-cardinality: resource names, not keys

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::resilience::circuit_breaker::CircuitState;

/// Install the Prometheus exporter with an HTTP listener on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    let builder = PrometheusBuilder::new().with_http_listener(addr);
    match builder.install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint started"),
        Err(e) => tracing::error!(error = %e, address = %addr, "Failed to install metrics exporter"),
    }
}

pub fn record_attempt(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    counter!("resilience_attempts_total", "outcome" => outcome).increment(1);
}

pub fn record_retry() {
    counter!("resilience_retries_total").increment(1);
}

pub fn record_circuit_transition(resource: &str, to: CircuitState) {
    counter!(
        "resilience_circuit_transitions_total",
        "resource" => resource.to_string(),
        "to" => to.as_str()
    )
    .increment(1);
    gauge!("resilience_circuit_state", "resource" => resource.to_string()).set(match to {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    });
}

pub fn record_circuit_rejection(resource: &str) {
    counter!("resilience_circuit_rejections_total", "resource" => resource.to_string())
        .increment(1);
}

pub fn record_rate_limited(strategy: &'static str) {
    counter!("resilience_rate_limited_total", "strategy" => strategy).increment(1);
}

pub fn set_rate_limit_entries(count: usize) {
    gauge!("resilience_rate_limit_entries").set(count as f64);
}

pub fn record_failover() {
    counter!("resilience_endpoint_failovers_total").increment(1);
}

pub fn record_batch_item(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    counter!("resilience_batch_items_total", "outcome" => outcome).increment(1);
}
