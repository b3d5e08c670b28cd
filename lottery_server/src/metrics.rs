//! Prometheus metrics for the session service.
//!
//! Counters are recorded through the `metrics` facade. Nothing is exported
//! unless [`init_metrics`] installs the Prometheus listener, in which case
//! they are scraped from `http://<addr>/metrics`.
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use lottery_server::metrics;
//! use std::net::SocketAddr;
//!
//! let addr: SocketAddr = "127.0.0.1:9090".parse().unwrap();
//! metrics::init_metrics(addr).unwrap();
//!
//! metrics::login_attempts_total(true);
//! ```

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Initialize Prometheus metrics exporter.
///
/// Sets up a Prometheus scrape endpoint on the specified address.
pub fn init_metrics(addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {}", e))
}

// ============================================================================
// HTTP Metrics
// ============================================================================

/// Record HTTP request.
///
/// `path` should be the matched route template so that IDs do not explode
/// label cardinality.
pub fn http_requests_total(method: &str, path: &str, status: u16) {
    metrics::counter!("http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

// ============================================================================
// Auth Metrics
// ============================================================================

/// Increment login attempts counter.
pub fn login_attempts_total(success: bool) {
    metrics::counter!("login_attempts_total",
        "success" => success.to_string()
    )
    .increment(1);
}

/// Increment refresh token rotation counter.
pub fn token_refresh_total(success: bool) {
    metrics::counter!("token_refresh_total",
        "success" => success.to_string()
    )
    .increment(1);
}

/// Increment logins rejected by the device cap.
pub fn device_limit_rejections_total() {
    metrics::counter!("device_limit_rejections_total").increment(1);
}
