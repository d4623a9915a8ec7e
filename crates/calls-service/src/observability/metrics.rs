//! Metrics definitions for the calls service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `calls_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `status`: `success` or a `CallsError::kind()` label (~16 values)
//! - `reason`: fixed sets per metric (≤ 5 values)
//! - `event`, `message_type`: bounded by wire enums (~20 values)
//! - `direction`: `in`, `out`

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus recorder and return the handle for rendering.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // CAS round trips against Redis
        .set_buckets_for_metric(
            Matcher::Full("calls_state_update_duration_seconds".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set state update buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Full("calls_state_update_attempts".to_string()),
            &[1.0, 2.0, 3.0, 4.0, 8.0, 16.0],
        )
        .map_err(|e| format!("Failed to set state attempt buckets: {e}"))?
        // Sessions last from seconds to hours
        .set_buckets_for_metric(
            Matcher::Full("calls_session_duration_seconds".to_string()),
            &[
                1.0, 10.0, 30.0, 60.0, 300.0, 900.0, 1800.0, 3600.0, 7200.0, 14400.0,
            ],
        )
        .map_err(|e| format!("Failed to set session duration buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Sessions & Calls
// ============================================================================

/// Metric: `calls_sessions_active`
pub fn set_active_sessions(count: usize) {
    // usize to f64 conversion is safe for realistic session counts
    #[allow(clippy::cast_precision_loss)]
    gauge!("calls_sessions_active").set(count as f64);
}

/// Metric: `calls_started_total`
pub fn record_call_started() {
    counter!("calls_started_total").increment(1);
}

/// Metric: `calls_ended_total`
pub fn record_call_ended() {
    counter!("calls_ended_total").increment(1);
}

/// Record a join outcome.
///
/// Metric: `calls_joins_total`
/// Labels: `status` (`success` or error kind)
pub fn record_join(status: &'static str) {
    counter!("calls_joins_total", "status" => status).increment(1);
}

/// Record a reconnect outcome.
///
/// Metric: `calls_reconnects_total`
/// Labels: `status` (`success` or error kind)
pub fn record_reconnect(status: &'static str) {
    counter!("calls_reconnects_total", "status" => status).increment(1);
}

/// Record why a session's leave path completed.
///
/// Metric: `calls_leaves_total`
/// Labels: `reason` (leave, timeout, media_closed, reconnected)
pub fn record_leave(reason: &'static str) {
    counter!("calls_leaves_total", "reason" => reason).increment(1);
}

/// Metric: `calls_session_duration_seconds`
pub fn record_session_duration(duration: Duration) {
    histogram!("calls_session_duration_seconds").record(duration.as_secs_f64());
}

// ============================================================================
// Client Traffic
// ============================================================================

/// Record a client websocket event.
///
/// Metric: `calls_websocket_events_total`
/// Labels: `direction` (in, out), `event`
pub fn record_ws_event(direction: &'static str, event: &'static str) {
    counter!("calls_websocket_events_total", "direction" => direction, "event" => event)
        .increment(1);
}

/// Record a dropped inbound client message.
///
/// Metric: `calls_messages_dropped_total`
/// Labels: `reason` (rate_limited, queue_full)
pub fn record_message_dropped(reason: &'static str) {
    counter!("calls_messages_dropped_total", "reason" => reason).increment(1);
}

// ============================================================================
// Call State
// ============================================================================

/// Record a committed state update.
///
/// Metrics: `calls_state_update_duration_seconds`, `calls_state_update_attempts`
pub fn record_state_update(attempts: u32, duration: Duration) {
    histogram!("calls_state_update_duration_seconds").record(duration.as_secs_f64());
    histogram!("calls_state_update_attempts").record(f64::from(attempts));
}

/// Metric: `calls_state_conflicts_total`
pub fn record_state_conflict() {
    counter!("calls_state_conflicts_total").increment(1);
}

// ============================================================================
// Media & Cluster
// ============================================================================

/// Record a media transport dispatch.
///
/// Metric: `calls_rtc_messages_total`
/// Labels: `message_type`, `status` (success, error)
pub fn record_rtc_message(message_type: &'static str, success: bool) {
    let status = if success { "success" } else { "error" };
    counter!("calls_rtc_messages_total", "message_type" => message_type, "status" => status)
        .increment(1);
}

/// Record a relay enqueue attempt.
///
/// Metric: `calls_cluster_messages_total`
/// Labels: `message_type`, `outcome` (queued, dropped, received, ignored)
pub fn record_relay_message(message_type: &'static str, outcome: &'static str) {
    counter!("calls_cluster_messages_total", "message_type" => message_type, "outcome" => outcome)
        .increment(1);
}

/// Record a relay delivery attempt.
///
/// Metric: `calls_cluster_deliveries_total`
/// Labels: `status` (success, error)
pub fn record_relay_delivery(success: bool) {
    let status = if success { "success" } else { "error" };
    counter!("calls_cluster_deliveries_total", "status" => status).increment(1);
}
