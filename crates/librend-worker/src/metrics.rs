//! Prometheus metrics for the rendering worker.

use std::net::{Ipv4Addr, SocketAddr};

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its HTTP listener on `port`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(port: u16) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
        .install()
}

/// Metric names as constants for consistency.
pub mod names {
    // Admission metrics
    pub const SEGMENTS_ACCEPTED_TOTAL: &str = "librend_segments_accepted_total";
    pub const SEGMENTS_REJECTED_TOTAL: &str = "librend_segments_rejected_total";

    // Render metrics
    pub const RENDERS_COMPLETED_TOTAL: &str = "librend_renders_completed_total";
    pub const RENDERS_FAILED_TOTAL: &str = "librend_renders_failed_total";
    pub const RENDER_DURATION_SECONDS: &str = "librend_render_duration_seconds";
    pub const SESSION_ACTIVE: &str = "librend_session_active";

    // Broker metrics
    pub const KEEPALIVE_FAILURES_TOTAL: &str = "librend_keepalive_failures_total";
}

pub fn record_segment_accepted() {
    counter!(names::SEGMENTS_ACCEPTED_TOTAL).increment(1);
}

/// Record a rejected segment by reason.
pub fn record_segment_rejected(reason: &str) {
    let labels = [("reason", reason.to_string())];
    counter!(names::SEGMENTS_REJECTED_TOTAL, &labels).increment(1);
}

pub fn record_render_completed(duration_secs: f64) {
    counter!(names::RENDERS_COMPLETED_TOTAL).increment(1);
    histogram!(names::RENDER_DURATION_SECONDS).record(duration_secs);
}

pub fn record_render_failed() {
    counter!(names::RENDERS_FAILED_TOTAL).increment(1);
}

/// 1 while a session is accumulating or rendering.
pub fn set_session_active(active: bool) {
    gauge!(names::SESSION_ACTIVE).set(if active { 1.0 } else { 0.0 });
}

pub fn record_keepalive_failure(target: &str) {
    let labels = [("target", target.to_string())];
    counter!(names::KEEPALIVE_FAILURES_TOTAL, &labels).increment(1);
}
