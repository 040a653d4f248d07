//! Prometheus metrics recorder and `/metrics` endpoint support.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Must be called once at server startup before any metrics are recorded.
pub fn install_recorder() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install metrics recorder");
    info!("prometheus metrics recorder installed");
    handle
}

// Metric name constants to avoid typos across modules.

/// Relay sessions opened total (counter, labels: mode).
pub const RELAY_SESSIONS_TOTAL: &str = "relay_sessions_total";
/// Active relay sessions (gauge).
pub const RELAY_SESSIONS_ACTIVE: &str = "relay_sessions_active";
/// Sessions rejected before any upstream attempt (counter, labels: mode).
pub const RELAY_SESSIONS_REJECTED_TOTAL: &str = "relay_sessions_rejected_total";
/// Frames relayed (counter, labels: direction).
pub const RELAY_FRAMES_TOTAL: &str = "relay_frames_total";
/// Frames drained from the pre-connect queue (counter, labels: mode).
pub const RELAY_QUEUED_FRAMES_TOTAL: &str = "relay_queued_frames_total";
/// Language fallback retries issued (counter).
pub const RELAY_FALLBACK_RETRIES_TOTAL: &str = "relay_fallback_retries_total";
/// Fatal session errors (counter, labels: kind).
pub const RELAY_ERRORS_TOTAL: &str = "relay_errors_total";
/// Session teardowns (counter, labels: cause).
pub const RELAY_TEARDOWNS_TOTAL: &str = "relay_teardowns_total";
/// Session duration seconds (histogram, labels: mode).
pub const RELAY_SESSION_DURATION_SECONDS: &str = "relay_session_duration_seconds";
