//! Client message to media transport translation.
//!
//! Whether a message should be relayed to another node is decided by the
//! lifecycle manager; by the time it reaches the dispatcher it is meant for
//! the backend configured on this node.

use crate::client::{ClientMessage, ClientMessageType};
use crate::errors::CallsError;
use crate::observability::metrics;
use crate::rtc::{
    CoordinatorMessage, MediaCoordinator, MediaEngine, OnClose, RtcMessage, RtcMessageType,
    SessionConfig,
};

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Where media sessions live.
#[derive(Clone)]
pub enum MediaBackend {
    /// Engine embedded in this node.
    Local(Arc<dyn MediaEngine>),
    /// Remote media coordination service.
    Remote(Arc<dyn MediaCoordinator>),
}

/// Sends media transport messages to the configured backend.
#[derive(Clone)]
pub struct RtcDispatcher {
    backend: MediaBackend,
}

/// Media transport message kind for a client message, if it has one.
pub fn rtc_type(msg_type: ClientMessageType) -> Option<RtcMessageType> {
    match msg_type {
        ClientMessageType::Sdp => Some(RtcMessageType::Sdp),
        ClientMessageType::Ice => Some(RtcMessageType::Ice),
        ClientMessageType::Mute => Some(RtcMessageType::Mute),
        ClientMessageType::Unmute => Some(RtcMessageType::Unmute),
        ClientMessageType::ScreenOn => Some(RtcMessageType::ScreenOn),
        ClientMessageType::ScreenOff => Some(RtcMessageType::ScreenOff),
        _ => None,
    }
}

/// Translate `msg` for the media session `session_id`.
///
/// # Errors
///
/// `CallsError::InvalidMessage` for client messages that have no media
/// transport counterpart.
pub fn translate(msg: &ClientMessage, session_id: &str) -> Result<RtcMessage, CallsError> {
    let msg_type = rtc_type(msg.msg_type).ok_or_else(|| {
        CallsError::InvalidMessage(format!(
            "{} has no media transport counterpart",
            msg.msg_type.as_str()
        ))
    })?;
    Ok(RtcMessage {
        session_id: session_id.to_string(),
        msg_type,
        data: msg.data.clone(),
    })
}

impl RtcDispatcher {
    pub fn new(backend: MediaBackend) -> Self {
        Self { backend }
    }

    /// Whether media is handled by a remote coordination service.
    pub fn is_remote(&self) -> bool {
        matches!(self.backend, MediaBackend::Remote(_))
    }

    /// Translate and send a client message for `session_id` in `channel_id`.
    pub async fn dispatch(
        &self,
        channel_id: &str,
        session_id: &str,
        msg: &ClientMessage,
    ) -> Result<(), CallsError> {
        let rtc_msg = translate(msg, session_id)?;
        self.send(rtc_msg, channel_id).await
    }

    /// Send an already translated message.
    pub async fn send(&self, msg: RtcMessage, channel_id: &str) -> Result<(), CallsError> {
        let msg_type = msg.msg_type.as_str();
        debug!(
            target: "calls.rtc",
            channel_id = %channel_id,
            session_id = %msg.session_id,
            msg_type = msg_type,
            "Dispatching media message"
        );

        let result = match &self.backend {
            MediaBackend::Local(engine) => engine.send(msg).await,
            MediaBackend::Remote(coordinator) => {
                coordinator
                    .send(CoordinatorMessage::Rtc(msg), channel_id)
                    .await
            }
        };
        metrics::record_rtc_message(msg_type, result.is_ok());
        result
    }

    /// Start a local media session. Remote backends create sessions from
    /// the join envelope instead, so this is a no-op for them.
    pub async fn init_session(&self, config: SessionConfig, on_close: OnClose) -> Result<(), CallsError> {
        match &self.backend {
            MediaBackend::Local(engine) => engine.init_session(config, on_close).await,
            MediaBackend::Remote(_) => Ok(()),
        }
    }

    /// Close the media session `session_id`.
    pub async fn close_session(&self, channel_id: &str, session_id: &str) -> Result<(), CallsError> {
        match &self.backend {
            MediaBackend::Local(engine) => engine.close_session(session_id).await,
            MediaBackend::Remote(coordinator) => {
                coordinator
                    .send(
                        CoordinatorMessage::Leave {
                            session_id: session_id.to_string(),
                        },
                        channel_id,
                    )
                    .await
            }
        }
    }

    /// Announce a joining session to the remote service.
    pub async fn join(&self, channel_id: &str, user_id: &str, session_id: &str) -> Result<(), CallsError> {
        match &self.backend {
            MediaBackend::Remote(coordinator) => {
                coordinator
                    .send(
                        CoordinatorMessage::Join {
                            call_id: channel_id.to_string(),
                            user_id: user_id.to_string(),
                            session_id: session_id.to_string(),
                        },
                        channel_id,
                    )
                    .await
            }
            MediaBackend::Local(_) => Ok(()),
        }
    }

    /// Ask the remote service to rebind `session_id` to a new connection.
    pub async fn reconnect(&self, channel_id: &str, session_id: &str) -> Result<(), CallsError> {
        match &self.backend {
            MediaBackend::Remote(coordinator) => {
                coordinator
                    .send(
                        CoordinatorMessage::Reconnect {
                            session_id: session_id.to_string(),
                        },
                        channel_id,
                    )
                    .await
            }
            MediaBackend::Local(_) => Ok(()),
        }
    }

    /// Outbound message stream of the backend. Yields once.
    pub fn take_receiver(&self) -> Option<mpsc::Receiver<RtcMessage>> {
        let receiver = match &self.backend {
            MediaBackend::Local(engine) => engine.take_receiver(),
            MediaBackend::Remote(coordinator) => coordinator.take_receiver(),
        };
        if receiver.is_none() {
            warn!(target: "calls.rtc", "Media receive stream already taken");
        }
        receiver
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingEngine {
        sent: Mutex<Vec<RtcMessage>>,
        closed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MediaEngine for RecordingEngine {
        async fn init_session(&self, _config: SessionConfig, _on_close: OnClose) -> Result<(), CallsError> {
            Ok(())
        }

        async fn send(&self, msg: RtcMessage) -> Result<(), CallsError> {
            self.sent.lock().unwrap().push(msg);
            Ok(())
        }

        async fn close_session(&self, session_id: &str) -> Result<(), CallsError> {
            self.closed.lock().unwrap().push(session_id.to_string());
            Ok(())
        }

        fn take_receiver(&self) -> Option<mpsc::Receiver<RtcMessage>> {
            None
        }
    }

    #[derive(Default)]
    struct RecordingCoordinator {
        sent: Mutex<Vec<(CoordinatorMessage, String)>>,
    }

    #[async_trait]
    impl MediaCoordinator for RecordingCoordinator {
        async fn send(&self, msg: CoordinatorMessage, channel_id: &str) -> Result<(), CallsError> {
            self.sent.lock().unwrap().push((msg, channel_id.to_string()));
            Ok(())
        }

        fn take_receiver(&self) -> Option<mpsc::Receiver<RtcMessage>> {
            None
        }
    }

    #[test]
    fn test_translate_keeps_payload() {
        let msg = ClientMessage::new(ClientMessageType::Sdp, b"v=0".to_vec());
        let rtc = translate(&msg, "orig-1").unwrap();
        assert_eq!(rtc.session_id, "orig-1");
        assert_eq!(rtc.msg_type, RtcMessageType::Sdp);
        assert_eq!(rtc.data, b"v=0");
    }

    #[test]
    fn test_translate_rejects_non_media_messages() {
        for msg_type in [
            ClientMessageType::VoiceOn,
            ClientMessageType::RaiseHand,
            ClientMessageType::React,
        ] {
            assert!(translate(&ClientMessage::new(msg_type, Vec::new()), "s").is_err());
        }
    }

    #[tokio::test]
    async fn test_local_dispatch_goes_to_engine() {
        let engine = Arc::new(RecordingEngine::default());
        let dispatcher = RtcDispatcher::new(MediaBackend::Local(engine.clone()));

        dispatcher
            .dispatch("chan-1", "orig-1", &ClientMessage::new(ClientMessageType::Mute, Vec::new()))
            .await
            .unwrap();
        dispatcher.close_session("chan-1", "orig-1").await.unwrap();
        dispatcher.join("chan-1", "alice", "orig-1").await.unwrap();

        let sent = engine.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent.first().unwrap().msg_type, RtcMessageType::Mute);
        assert_eq!(*engine.closed.lock().unwrap(), vec!["orig-1".to_string()]);
        assert!(!dispatcher.is_remote());
    }

    #[tokio::test]
    async fn test_remote_dispatch_envelopes_by_channel() {
        let coordinator = Arc::new(RecordingCoordinator::default());
        let dispatcher = RtcDispatcher::new(MediaBackend::Remote(coordinator.clone()));

        dispatcher.join("chan-1", "alice", "orig-1").await.unwrap();
        dispatcher
            .dispatch("chan-1", "orig-1", &ClientMessage::new(ClientMessageType::Ice, b"c".to_vec()))
            .await
            .unwrap();
        dispatcher.reconnect("chan-1", "orig-1").await.unwrap();
        dispatcher.close_session("chan-1", "orig-1").await.unwrap();

        let sent = coordinator.sent.lock().unwrap();
        let kinds: Vec<&str> = sent.iter().map(|(m, _)| m.kind()).collect();
        assert_eq!(kinds, vec!["join", "rtc", "reconnect", "leave"]);
        assert!(sent.iter().all(|(_, channel)| channel == "chan-1"));
    }
}
