//! Calls service error types.
//!
//! Errors map to a client-safe message used for the `error` event sent to a
//! user whose join failed. Internal details are logged server-side but not
//! exposed to clients.

use thiserror::Error;

/// Calls service error type.
#[derive(Debug, Error)]
pub enum CallsError {
    /// User lacks permission to post in the channel.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Channel is archived, deleted or could not be fetched.
    #[error("Channel unavailable: {0}")]
    ChannelUnavailable(String),

    /// Reconnect referenced a channel without an active call.
    #[error("Call state not found for channel {0}")]
    CallStateNotFound(String),

    /// Reconnect referenced a connection unknown to the call.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Another reconnect already superseded this connection.
    #[error("Session already reconnected: {0}")]
    AlreadyReconnected(String),

    /// Screen share exclusivity violated.
    #[error("Screen share conflict: {0}")]
    ScreenShareConflict(String),

    /// A mutation targeted a channel whose call record is gone.
    #[error("Call state missing: {0}")]
    CallStateMissing(String),

    /// Call is at capacity.
    #[error("Call at capacity: {0}")]
    CapacityExceeded(String),

    /// Compare-and-swap retries exhausted.
    #[error("State conflict: {0}")]
    StateConflict(String),

    /// Cluster relay could not accept or deliver a message.
    #[error("Relay failure: {0}")]
    RelayFailure(String),

    /// Local media engine or remote media coordination service failed.
    #[error("Media engine failure: {0}")]
    MediaEngineFailure(String),

    /// Malformed client message.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Redis operation failed.
    #[error("Redis error: {0}")]
    Redis(String),

    /// Serialization of state or envelopes failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error with context.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CallsError {
    /// Returns a client-safe error message (no internal details).
    pub fn client_message(&self) -> String {
        match self {
            CallsError::Forbidden(_) => "forbidden".to_string(),
            CallsError::ChannelUnavailable(_) => "cannot join call in archived channel".to_string(),
            CallsError::CallStateNotFound(_) => "call state not found".to_string(),
            CallsError::SessionNotFound(_) => "session not found in call state".to_string(),
            CallsError::AlreadyReconnected(_) => "session already reconnected".to_string(),
            CallsError::ScreenShareConflict(_) => "someone else is sharing their screen".to_string(),
            CallsError::CapacityExceeded(_) => "call is at capacity".to_string(),
            CallsError::InvalidMessage(_) => "invalid message".to_string(),
            CallsError::CallStateMissing(_)
            | CallsError::StateConflict(_)
            | CallsError::RelayFailure(_)
            | CallsError::MediaEngineFailure(_)
            | CallsError::Redis(_)
            | CallsError::Serialization(_)
            | CallsError::Config(_)
            | CallsError::Internal(_) => "an internal error occurred".to_string(),
        }
    }

    /// Short, bounded label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            CallsError::Forbidden(_) => "forbidden",
            CallsError::ChannelUnavailable(_) => "channel_unavailable",
            CallsError::CallStateNotFound(_) => "call_state_not_found",
            CallsError::SessionNotFound(_) => "session_not_found",
            CallsError::AlreadyReconnected(_) => "already_reconnected",
            CallsError::ScreenShareConflict(_) => "screen_share_conflict",
            CallsError::CallStateMissing(_) => "call_state_missing",
            CallsError::CapacityExceeded(_) => "capacity_exceeded",
            CallsError::StateConflict(_) => "state_conflict",
            CallsError::RelayFailure(_) => "relay_failure",
            CallsError::MediaEngineFailure(_) => "media_engine_failure",
            CallsError::InvalidMessage(_) => "invalid_message",
            CallsError::Redis(_) => "redis",
            CallsError::Serialization(_) => "serialization",
            CallsError::Config(_) => "config",
            CallsError::Internal(_) => "internal",
        }
    }
}

impl From<serde_json::Error> for CallsError {
    fn from(err: serde_json::Error) -> Self {
        CallsError::Serialization(err.to_string())
    }
}
