//! Prometheus metrics for the API.
//!
//! Metrics are exposed on a dedicated listener (default `0.0.0.0:9090`), separate
//! from the public API port.
//!
//! # Available Metrics
//!
//! ## Counters
//! - `ethapi_http_requests_total` - Completed requests (labels: method, status)
//! - `ethapi_rate_limit_rejections_total` - Requests rejected by the rate limiter
//! - `ethapi_auth_failures_total` - Missing, unknown or throttled credentials
//! - `ethapi_panics_recovered_total` - Panics turned into 500 responses
//!
//! ## Histograms
//! - `ethapi_http_request_duration_seconds` - Request latency (labels: method, status)
//! - `ethapi_upstream_call_duration_seconds` - Node call latency (labels: call, outcome)
//!
//! ## Gauges
//! - `ethapi_rate_limit_tracked_clients` - Client identities with a live rate window
//!
//! Recording functions are no-ops until [`init_metrics`] installs the recorder,
//! so tests and tools can call them freely.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const HTTP_REQUESTS_TOTAL: &str = "ethapi_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "ethapi_http_request_duration_seconds";
    pub const UPSTREAM_CALL_DURATION_SECONDS: &str = "ethapi_upstream_call_duration_seconds";
    pub const RATE_LIMIT_REJECTIONS_TOTAL: &str = "ethapi_rate_limit_rejections_total";
    pub const AUTH_FAILURES_TOTAL: &str = "ethapi_auth_failures_total";
    pub const PANICS_RECOVERED_TOTAL: &str = "ethapi_panics_recovered_total";
    pub const RATE_LIMIT_TRACKED_CLIENTS: &str = "ethapi_rate_limit_tracked_clients";
}

/// Install the Prometheus exporter and describe every metric.
///
/// # Errors
///
/// Returns a message if the recorder is already installed or the listener
/// cannot be bound.
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        names::HTTP_REQUESTS_TOTAL,
        "Total number of completed HTTP requests"
    );
    describe_counter!(
        names::RATE_LIMIT_REJECTIONS_TOTAL,
        "Total number of requests rejected by the rate limiter"
    );
    describe_counter!(
        names::AUTH_FAILURES_TOTAL,
        "Total number of failed or throttled authentication attempts"
    );
    describe_counter!(
        names::PANICS_RECOVERED_TOTAL,
        "Total number of panics converted into 500 responses"
    );

    describe_histogram!(
        names::HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_histogram!(
        names::UPSTREAM_CALL_DURATION_SECONDS,
        "Ethereum node call duration in seconds"
    );

    describe_gauge!(
        names::RATE_LIMIT_TRACKED_CLIENTS,
        "Client identities currently holding a rate-limit window"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

/// Record a completed HTTP request.
pub fn record_request(method: &str, status: u16, duration_secs: f64) {
    let status = status.to_string();
    counter!(names::HTTP_REQUESTS_TOTAL, "method" => method.to_string(), "status" => status.clone())
        .increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, "method" => method.to_string(), "status" => status)
        .record(duration_secs);
}

/// Record one upstream node call.
///
/// `outcome` is one of `success`, `error`, `timeout`, `cancelled`.
pub fn record_upstream_call(call: &'static str, outcome: &'static str, duration_secs: f64) {
    histogram!(names::UPSTREAM_CALL_DURATION_SECONDS, "call" => call, "outcome" => outcome)
        .record(duration_secs);
}

pub fn record_rate_limit_rejection() {
    counter!(names::RATE_LIMIT_REJECTIONS_TOTAL).increment(1);
}

pub fn record_auth_failure() {
    counter!(names::AUTH_FAILURES_TOTAL).increment(1);
}

pub fn record_panic_recovered() {
    counter!(names::PANICS_RECOVERED_TOTAL).increment(1);
}

pub fn set_rate_limit_tracked_clients(count: usize) {
    gauge!(names::RATE_LIMIT_TRACKED_CLIENTS).set(count as f64);
}
