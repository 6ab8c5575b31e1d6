//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by predicate decision
//! - `proxy_attempts_total` (counter): proxy attempts by outcome
//! - `proxy_retries_total` (counter): 5xx-triggered retries
//! - `proxy_workers_active` (gauge): worker tasks currently running
//! - `proxy_time_to_headers_seconds` (histogram): spawn to status+headers
//! - `proxy_body_bytes_total` (counter): body bytes relayed to callers
//!
//! Recording is a no-op until a recorder is installed, so library users and
//! tests pay nothing.

use std::net::SocketAddr;
use std::time::Instant;

use ::metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Predicate decision for one inbound request ("proxy" or "pass").
pub fn record_decision(decision: &'static str) {
    counter!("proxy_requests_total", "decision" => decision).increment(1);
}

/// Result of one attempt ("ok", "connection_error", "server_error", "protocol_error").
pub fn record_attempt(outcome: &'static str) {
    counter!("proxy_attempts_total", "outcome" => outcome).increment(1);
}

pub fn record_retry() {
    counter!("proxy_retries_total").increment(1);
}

pub fn record_time_to_headers(start: Instant) {
    histogram!("proxy_time_to_headers_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_body_bytes(bytes: usize) {
    counter!("proxy_body_bytes_total").increment(bytes as u64);
}

pub fn worker_started() {
    gauge!("proxy_workers_active").increment(1.0);
}

pub fn worker_stopped() {
    gauge!("proxy_workers_active").decrement(1.0);
}
