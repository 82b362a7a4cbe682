//! Metrics collection and exposition.
//!
//! # Metrics
//! - `http_requests_in_flight` (gauge): requests currently counted by the drain layer
//! - `http_requests_total` (counter): finished requests by outcome
//! - `http_connections_accepted_total` (counter): connections handed out by the listener
//! - `http_shutdown_timeouts_total` (counter): shutdowns that exceeded their budget
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed
//! - The Prometheus exporter runs its own listener, separate from the served address

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// How a request left the drain layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Served,
    RejectedClosing,
    Panicked,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Served => "served",
            Outcome::RejectedClosing => "rejected_closing",
            Outcome::Panicked => "panicked",
        }
    }
}

/// Install the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn request_started() {
    metrics::gauge!("http_requests_in_flight").increment(1.0);
}

pub fn request_finished() {
    metrics::gauge!("http_requests_in_flight").decrement(1.0);
}

pub fn record_request(outcome: Outcome) {
    metrics::counter!("http_requests_total", "outcome" => outcome.as_str()).increment(1);
}

pub fn record_connection_accepted() {
    metrics::counter!("http_connections_accepted_total").increment(1);
}

pub fn record_shutdown_timeout() {
    metrics::counter!("http_shutdown_timeouts_total").increment(1);
}
