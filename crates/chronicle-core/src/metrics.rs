//! Prometheus metrics helpers for the Chronicle system.
//!
//! This module provides centralized metrics initialization and the metric
//! definitions used across Chronicle components.
//!
//! # Usage
//!
//! ```rust,ignore
//! use chronicle_core::metrics::{init_metrics, start_metrics_server};
//!
//! #[tokio::main]
//! async fn main() {
//!     // Initialize the Prometheus recorder
//!     let handle = init_metrics();
//!
//!     // Start the HTTP server for /metrics endpoint
//!     start_metrics_server(9090, handle).await.unwrap();
//!
//!     // Now use metrics anywhere in your code
//!     use metrics::{counter, gauge};
//!     counter!("scan_events_discovered_total").increment(1);
//!     gauge!("fetch_pending").set(42.0);
//! }
//! ```
//!
//! # Metric Naming Conventions
//!
//! - Prefix: pipeline stage (`scan_`, `fetch_`, `write_`)
//! - Suffix: unit or type (`_total`, `_bytes`, `_seconds`)

use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

/// Initialize the Prometheus metrics recorder.
///
/// This must be called once at startup before any metrics are recorded.
/// Returns a handle that can be used with [`start_metrics_server`].
///
/// # Panics
///
/// Panics if called more than once (the recorder can only be installed once).
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder");

    register_common_metrics();

    handle
}

/// Try to initialize the Prometheus metrics recorder.
///
/// Like [`init_metrics`] but returns `None` if the recorder is already
/// installed, instead of panicking. Useful for tests or optional metrics.
pub fn try_init_metrics() -> Option<PrometheusHandle> {
    PrometheusBuilder::new().install_recorder().ok()
}

/// Start the Prometheus metrics HTTP server.
///
/// Serves the `/metrics` endpoint on the specified port.
/// This spawns a background task and returns immediately.
///
/// # Arguments
///
/// * `port` - TCP port to listen on (e.g., 9090)
/// * `handle` - Prometheus handle from [`init_metrics`]
pub async fn start_metrics_server(
    port: u16,
    handle: PrometheusHandle,
) -> Result<(), std::io::Error> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::warn!("Metrics server exited: {}", e);
        }
    });

    Ok(())
}

/// Register descriptions for the metrics recorded by the pipeline.
///
/// Called automatically by [`init_metrics`].
fn register_common_metrics() {
    // =========================================================================
    // Range Scanner Metrics
    // =========================================================================

    describe_counter!(
        "scan_ranges_total",
        "Block sub-ranges successfully read from the event source"
    );
    describe_counter!(
        "scan_range_failures_total",
        "Block sub-ranges that could not be read (skipped or retried)"
    );
    describe_counter!(
        "scan_events_discovered_total",
        "Recognized events discovered and submitted to the pipeline"
    );
    describe_counter!(
        "scan_events_skipped_total",
        "Log entries discarded because their event type was unrecognized"
    );
    describe_counter!(
        "scan_backpressure_pauses_total",
        "Times the scanner paused because the fetch backlog was over threshold"
    );
    describe_gauge!(
        "scan_running",
        "Whether a scan is currently running (1=yes, 0=no)"
    );

    // =========================================================================
    // Fetch Pool / Content Fetcher Metrics
    // =========================================================================

    describe_gauge!(
        "fetch_pending",
        "Enrichment fetches queued or in flight in the fetch pool"
    );
    describe_counter!(
        "fetch_success_total",
        "Content fetches that returned a JSON object and were merged"
    );
    describe_counter!(
        "fetch_failed_total",
        "Content fetches that failed and marked their record fetchFailed"
    );
    describe_counter!(
        "fetch_dropped_results_total",
        "Enrichment results whose consumer was gone before resolution"
    );

    // =========================================================================
    // Ordered Writer / Sink Metrics
    // =========================================================================

    describe_counter!("write_records_total", "Records appended to the output sink");
    describe_counter!(
        "write_bytes_total",
        "Bytes appended to the output sink (before compression)"
    );
    describe_counter!(
        "write_errors_total",
        "Records lost to serialization or append errors"
    );
    describe_counter!(
        "write_unresolved_total",
        "Submitted handles that closed without ever resolving"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Once;

    // Ensure metrics are initialized exactly once for all tests
    static INIT: Once = Once::new();

    fn ensure_metrics_init() {
        INIT.call_once(|| {
            let _ = try_init_metrics();
        });
    }

    #[test]
    fn test_try_init_metrics_idempotent() {
        let handle1 = try_init_metrics();
        let handle2 = try_init_metrics();

        // At most one should succeed
        assert!(handle1.is_none() || handle2.is_none());
    }

    #[test]
    fn test_register_common_metrics_does_not_panic() {
        ensure_metrics_init();
        // Descriptions are idempotent
        register_common_metrics();
        register_common_metrics();
    }
}
