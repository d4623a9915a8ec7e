//! Observability for the calls service.
//!
//! Logging uses `tracing` with one target per module (`calls.lifecycle`,
//! `calls.state`, `calls.cluster`, `calls.rtc`, `calls.ratelimit`,
//! `calls.registry`, `calls.node`). Lifecycle entry points are instrumented
//! with `#[instrument(skip_all)]` and an explicit allow-list of IDs.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `calls_sessions_active` | Gauge | none | Sessions registered on this node |
//! | `calls_started_total` | Counter | none | Calls started by this node |
//! | `calls_ended_total` | Counter | none | Calls ended by this node |
//! | `calls_joins_total` | Counter | `status` | Join outcomes |
//! | `calls_reconnects_total` | Counter | `status` | Reconnect outcomes |
//! | `calls_leaves_total` | Counter | `reason` | Why sessions ended |
//! | `calls_session_duration_seconds` | Histogram | none | Session lifetime |
//! | `calls_websocket_events_total` | Counter | `direction`, `event` | Client traffic |
//! | `calls_messages_dropped_total` | Counter | `reason` | Rate limited or queue full |
//! | `calls_state_update_duration_seconds` | Histogram | none | CAS update latency |
//! | `calls_state_update_attempts` | Histogram | none | CAS attempts per update |
//! | `calls_state_conflicts_total` | Counter | none | CAS version conflicts |
//! | `calls_rtc_messages_total` | Counter | `message_type`, `status` | Media dispatch |
//! | `calls_cluster_messages_total` | Counter | `message_type`, `outcome` | Relay enqueue |
//! | `calls_cluster_deliveries_total` | Counter | `status` | Relay delivery |

pub mod metrics;

pub use metrics::init_metrics_recorder;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "calls_service=info,calls=info";

/// Install a global tracing subscriber.
///
/// Uses `RUST_LOG` when set. `json` selects structured JSON output.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed (the host
/// process usually owns logging, so this is not fatal to callers).
pub fn init_tracing(json: bool) -> Result<(), String> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());

    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    result.map_err(|e| format!("Failed to install tracing subscriber: {e}"))
}
