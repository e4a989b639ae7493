//! Process counters for the probe.
//!
//! All metrics follow Prometheus naming conventions:
//! - `probe_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `partition`: partitions of the probe topic
//! - `stage`: 2 values (enqueue, delivery)
//! - `role`: 2 values (producer, consumer)
//! - `status`: 2 values (success, error)
//! - `endpoint`: 4 values (/metrics, /health, /ready, other)
//!
//! The round trip gauge itself is not recorded here; it lives in
//! [`crate::gauge::ExpiringGauge`] because it needs per-series expiry.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus recorder and return its handle for the scrape
/// endpoint.
///
/// Must be called before any counter is recorded.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("probe_http_request".to_string()),
            &[0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// Producer
// ============================================================================

/// Record a beacon handed to the broker client.
///
/// Metric: `probe_beacons_sent_total`
/// Labels: `partition`
pub fn record_beacon_sent(partition: i32) {
    counter!("probe_beacons_sent_total", "partition" => partition.to_string()).increment(1);
}

/// Record a beacon that failed to enqueue or to be delivered.
///
/// Metric: `probe_beacon_send_failures_total`
/// Labels: `stage` (enqueue, delivery)
pub fn record_beacon_send_failure(stage: &'static str) {
    counter!("probe_beacon_send_failures_total", "stage" => stage).increment(1);
}

// ============================================================================
// Consumer
// ============================================================================

/// Record a beacon of this probe that produced a latency sample.
///
/// Metric: `probe_beacons_received_total`
pub fn record_beacon_received() {
    counter!("probe_beacons_received_total").increment(1);
}

/// Record a beacon of this probe whose payload was not a send time.
///
/// Metric: `probe_malformed_beacons_total`
pub fn record_malformed_beacon() {
    counter!("probe_malformed_beacons_total").increment(1);
}

/// Record a failed consumer poll.
///
/// Metric: `probe_poll_errors_total`
pub fn record_poll_error() {
    counter!("probe_poll_errors_total").increment(1);
}

// ============================================================================
// Partition discovery
// ============================================================================

/// Record a partition metadata refresh.
///
/// Metric: `probe_partition_refresh_total`
/// Labels: `role`, `status` (success, error)
pub fn record_partition_refresh(role: &'static str, status: &'static str) {
    counter!("probe_partition_refresh_total", "role" => role, "status" => status).increment(1);
}

/// Record a refresh that replaced the tracked partition set.
///
/// Metric: `probe_partition_changes_total`
/// Labels: `role`
pub fn record_partition_change(role: &'static str) {
    counter!("probe_partition_changes_total", "role" => role).increment(1);
}

// ============================================================================
// HTTP
// ============================================================================

/// Record a served HTTP request.
///
/// Metric: `probe_http_requests_total`, `probe_http_request_duration_seconds`
/// Labels: `endpoint`, `status_code`
pub fn record_http_request(path: &str, status_code: u16, duration: Duration) {
    let endpoint = normalize_endpoint(path);

    histogram!("probe_http_request_duration_seconds", "endpoint" => endpoint)
        .record(duration.as_secs_f64());

    counter!("probe_http_requests_total",
        "endpoint" => endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

fn normalize_endpoint(path: &str) -> &'static str {
    match path {
        "/metrics" => "/metrics",
        "/health" => "/health",
        "/ready" => "/ready",
        _ => "other",
    }
}
