//! Media transport seam.
//!
//! Media is handled either by a [`MediaEngine`] running inside this node or
//! by a remote [`MediaCoordinator`] service. The [`RtcDispatcher`] hides the
//! difference from the lifecycle manager.

pub mod dispatcher;

pub use dispatcher::{MediaBackend, RtcDispatcher};

use crate::errors::CallsError;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Media transport message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RtcMessageType {
    Sdp,
    Ice,
    Mute,
    Unmute,
    ScreenOn,
    ScreenOff,
}

impl RtcMessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            RtcMessageType::Sdp => "sdp",
            RtcMessageType::Ice => "ice",
            RtcMessageType::Mute => "mute",
            RtcMessageType::Unmute => "unmute",
            RtcMessageType::ScreenOn => "screen_on",
            RtcMessageType::ScreenOff => "screen_off",
        }
    }
}

/// Message to or from the media transport, keyed by the session's original
/// connection ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtcMessage {
    pub session_id: String,
    #[serde(rename = "type")]
    pub msg_type: RtcMessageType,
    #[serde(default)]
    pub data: Vec<u8>,
}

/// Parameters for a new media session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub group_id: String,
    pub call_id: String,
    pub user_id: String,
    pub session_id: String,
}

impl SessionConfig {
    pub fn new(channel_id: &str, user_id: &str, session_id: &str) -> Self {
        Self {
            group_id: "default".to_string(),
            call_id: channel_id.to_string(),
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
        }
    }
}

/// Callback run by the engine when a media session closes on its own.
pub type OnClose = Box<dyn FnOnce() + Send + 'static>;

/// In-process media engine.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    async fn init_session(&self, config: SessionConfig, on_close: OnClose)
        -> Result<(), CallsError>;

    async fn send(&self, msg: RtcMessage) -> Result<(), CallsError>;

    async fn close_session(&self, session_id: &str) -> Result<(), CallsError>;

    /// Outbound messages for clients. Yields the stream once.
    fn take_receiver(&self) -> Option<mpsc::Receiver<RtcMessage>>;
}

/// Envelope for a remote media coordination service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum CoordinatorMessage {
    Join {
        #[serde(rename = "callID")]
        call_id: String,
        #[serde(rename = "userID")]
        user_id: String,
        #[serde(rename = "sessionID")]
        session_id: String,
    },
    Leave {
        #[serde(rename = "sessionID")]
        session_id: String,
    },
    Reconnect {
        #[serde(rename = "sessionID")]
        session_id: String,
    },
    Rtc(RtcMessage),
}

impl CoordinatorMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            CoordinatorMessage::Join { .. } => "join",
            CoordinatorMessage::Leave { .. } => "leave",
            CoordinatorMessage::Reconnect { .. } => "reconnect",
            CoordinatorMessage::Rtc(_) => "rtc",
        }
    }
}

/// Remote media coordination service client.
#[async_trait]
pub trait MediaCoordinator: Send + Sync {
    /// Send an envelope for the call in `channel_id`.
    async fn send(&self, msg: CoordinatorMessage, channel_id: &str) -> Result<(), CallsError>;

    /// Outbound messages for clients. Yields the stream once.
    fn take_receiver(&self) -> Option<mpsc::Receiver<RtcMessage>>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_coordinator_join_envelope_shape() {
        let msg = CoordinatorMessage::Join {
            call_id: "chan-1".to_string(),
            user_id: "alice".to_string(),
            session_id: "conn-1".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({
                "type": "join",
                "data": {"callID": "chan-1", "userID": "alice", "sessionID": "conn-1"}
            })
        );
    }

    #[test]
    fn test_coordinator_rtc_envelope_carries_message() {
        let msg = CoordinatorMessage::Rtc(RtcMessage {
            session_id: "conn-1".to_string(),
            msg_type: RtcMessageType::Mute,
            data: Vec::new(),
        });
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "rtc");
        assert_eq!(value["data"]["type"], "mute");
        assert_eq!(value["data"]["session_id"], "conn-1");
    }
}
