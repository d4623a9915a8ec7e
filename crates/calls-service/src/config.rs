//! Calls service configuration.
//!
//! Configuration is loaded from environment variables. All sensitive
//! fields are redacted in Debug output.

use secrecy::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default reconnection grace period in seconds.
pub const DEFAULT_RECONNECT_GRACE_PERIOD_SECONDS: u64 = 10;

/// Default rate limiter refill (messages per second).
pub const DEFAULT_RATE_LIMIT_PER_SECOND: u32 = 10;

/// Default rate limiter burst size.
pub const DEFAULT_RATE_LIMIT_BURST: u32 = 100;

/// Default per-session inbound queue capacity.
pub const DEFAULT_SESSION_QUEUE_CAPACITY: usize = 10;

/// Default per-destination cluster relay queue capacity.
pub const DEFAULT_RELAY_QUEUE_CAPACITY: usize = 256;

/// Default compare-and-swap attempts for call state updates.
pub const DEFAULT_STATE_MAX_ATTEMPTS: u32 = 16;

/// Default websocket action prefix stripped before dispatch.
pub const DEFAULT_ACTION_PREFIX: &str = "custom_calls_";

/// Default node ID prefix.
pub const DEFAULT_NODE_ID_PREFIX: &str = "calls";

/// Calls service configuration.
#[derive(Clone)]
pub struct Config {
    /// Redis connection URL (call state and cluster pub/sub).
    /// Protected by `SecretString` to prevent accidental logging.
    pub redis_url: SecretString,

    /// Unique identifier for this node.
    pub node_id: String,

    /// Websocket action prefix stripped from client actions.
    pub action_prefix: String,

    /// Reconnection grace period in seconds (default: 10).
    pub reconnect_grace_period_seconds: u64,

    /// Inbound messages per second allowed per session (default: 10).
    pub rate_limit_per_second: u32,

    /// Burst size of the per-session rate limiter (default: 100).
    pub rate_limit_burst: u32,

    /// Capacity of the per-session inbound queue (default: 10).
    pub session_queue_capacity: usize,

    /// Capacity of each cluster relay destination queue (default: 256).
    pub relay_queue_capacity: usize,

    /// Maximum compare-and-swap attempts per state update (default: 16).
    pub state_max_attempts: u32,

    /// Maximum participants per call, 0 for unlimited.
    pub max_participants: u32,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("redis_url", &"[REDACTED]")
            .field("node_id", &self.node_id)
            .field("action_prefix", &self.action_prefix)
            .field(
                "reconnect_grace_period_seconds",
                &self.reconnect_grace_period_seconds,
            )
            .field("rate_limit_per_second", &self.rate_limit_per_second)
            .field("rate_limit_burst", &self.rate_limit_burst)
            .field("session_queue_capacity", &self.session_queue_capacity)
            .field("relay_queue_capacity", &self.relay_queue_capacity)
            .field("state_max_attempts", &self.state_max_attempts)
            .field("max_participants", &self.max_participants)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Runtime settings consumed by the call controller.
///
/// Split out of [`Config`] so the controller can be built without a Redis URL
/// (single-node deployments and tests).
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub node_id: String,
    pub action_prefix: String,
    pub reconnect_grace_period: Duration,
    pub rate_limit_per_second: u32,
    pub rate_limit_burst: u32,
    pub session_queue_capacity: usize,
    pub relay_queue_capacity: usize,
    pub state_max_attempts: u32,
    pub max_participants: u32,
}

impl ControllerSettings {
    /// Settings with defaults for the given node.
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            action_prefix: DEFAULT_ACTION_PREFIX.to_string(),
            reconnect_grace_period: Duration::from_secs(DEFAULT_RECONNECT_GRACE_PERIOD_SECONDS),
            rate_limit_per_second: DEFAULT_RATE_LIMIT_PER_SECOND,
            rate_limit_burst: DEFAULT_RATE_LIMIT_BURST,
            session_queue_capacity: DEFAULT_SESSION_QUEUE_CAPACITY,
            relay_queue_capacity: DEFAULT_RELAY_QUEUE_CAPACITY,
            state_max_attempts: DEFAULT_STATE_MAX_ATTEMPTS,
            max_participants: 0,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let redis_url = SecretString::from(
            vars.get("REDIS_URL")
                .ok_or_else(|| ConfigError::MissingEnvVar("REDIS_URL".to_string()))?
                .clone(),
        );

        let action_prefix = vars
            .get("CALLS_ACTION_PREFIX")
            .cloned()
            .unwrap_or_else(|| DEFAULT_ACTION_PREFIX.to_string());

        let reconnect_grace_period_seconds = parse_or(
            vars,
            "CALLS_RECONNECT_GRACE_PERIOD_SECONDS",
            DEFAULT_RECONNECT_GRACE_PERIOD_SECONDS,
        )?;
        if reconnect_grace_period_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "CALLS_RECONNECT_GRACE_PERIOD_SECONDS must be greater than zero".to_string(),
            ));
        }

        let rate_limit_per_second = parse_or(
            vars,
            "CALLS_RATE_LIMIT_PER_SECOND",
            DEFAULT_RATE_LIMIT_PER_SECOND,
        )?;
        let rate_limit_burst = parse_or(vars, "CALLS_RATE_LIMIT_BURST", DEFAULT_RATE_LIMIT_BURST)?;
        if rate_limit_burst == 0 {
            return Err(ConfigError::InvalidValue(
                "CALLS_RATE_LIMIT_BURST must be greater than zero".to_string(),
            ));
        }

        let session_queue_capacity = parse_or(
            vars,
            "CALLS_SESSION_QUEUE_CAPACITY",
            DEFAULT_SESSION_QUEUE_CAPACITY,
        )?;
        let relay_queue_capacity = parse_or(
            vars,
            "CALLS_RELAY_QUEUE_CAPACITY",
            DEFAULT_RELAY_QUEUE_CAPACITY,
        )?;
        // tokio mpsc panics on zero capacity
        if session_queue_capacity == 0 || relay_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "queue capacities must be greater than zero".to_string(),
            ));
        }

        let state_max_attempts =
            parse_or(vars, "CALLS_STATE_MAX_ATTEMPTS", DEFAULT_STATE_MAX_ATTEMPTS)?;
        let max_participants = parse_or(vars, "CALLS_MAX_PARTICIPANTS", 0)?;

        // Generate node ID
        let node_id = vars.get("CALLS_NODE_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_NODE_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            redis_url,
            node_id,
            action_prefix,
            reconnect_grace_period_seconds,
            rate_limit_per_second,
            rate_limit_burst,
            session_queue_capacity,
            relay_queue_capacity,
            state_max_attempts,
            max_participants,
        })
    }

    /// Controller settings derived from this configuration.
    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            node_id: self.node_id.clone(),
            action_prefix: self.action_prefix.clone(),
            reconnect_grace_period: Duration::from_secs(self.reconnect_grace_period_seconds),
            rate_limit_per_second: self.rate_limit_per_second,
            rate_limit_burst: self.rate_limit_burst,
            session_queue_capacity: self.session_queue_capacity,
            relay_queue_capacity: self.relay_queue_capacity,
            state_max_attempts: self.state_max_attempts,
            max_participants: self.max_participants,
        }
    }
}

fn parse_or<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{key}={raw}"))),
        None => Ok(default),
    }
}
