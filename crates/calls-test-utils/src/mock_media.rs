//! Recording media backends.
//!
//! [`MockMediaEngine`] stands in for an embedded media server and
//! [`MockMediaCoordinator`] for a remote coordination service. Both record
//! what they receive and expose a sender for injecting outbound messages
//! that the controller's signal writer delivers to clients.

use async_trait::async_trait;
use calls_service::errors::CallsError;
use calls_service::rtc::{
    CoordinatorMessage, MediaCoordinator, MediaEngine, OnClose, RtcMessage, SessionConfig,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

const OUTBOUND_CAPACITY: usize = 64;

/// Mock embedded media engine.
pub struct MockMediaEngine {
    sessions: Mutex<HashMap<String, (SessionConfig, OnClose)>>,
    sent: Mutex<Vec<RtcMessage>>,
    closed: Mutex<Vec<String>>,
    fail_init: AtomicBool,
    outbound_tx: mpsc::Sender<RtcMessage>,
    outbound_rx: Mutex<Option<mpsc::Receiver<RtcMessage>>>,
}

impl Default for MockMediaEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockMediaEngine {
    pub fn new() -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        Self {
            sessions: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
            closed: Mutex::new(Vec::new()),
            fail_init: AtomicBool::new(false),
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
        }
    }

    /// Make every following `init_session` fail.
    pub fn fail_init(&self, fail: bool) {
        self.fail_init.store(fail, Ordering::SeqCst);
    }

    /// Messages received, in order.
    pub fn sent(&self) -> Vec<RtcMessage> {
        self.sent.lock().unwrap().clone()
    }

    /// Session IDs closed by the controller, in order.
    pub fn closed(&self) -> Vec<String> {
        self.closed.lock().unwrap().clone()
    }

    pub fn has_session(&self, session_id: &str) -> bool {
        self.sessions.lock().unwrap().contains_key(session_id)
    }

    pub fn session_config(&self, session_id: &str) -> Option<SessionConfig> {
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .map(|(config, _)| config.clone())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    /// Close `session_id` from the engine side, running its close callback.
    ///
    /// Returns false when no such session is open.
    pub fn trigger_close(&self, session_id: &str) -> bool {
        let entry = self.sessions.lock().unwrap().remove(session_id);
        match entry {
            Some((_, on_close)) => {
                on_close();
                true
            }
            None => false,
        }
    }

    /// Emit an outbound message towards clients.
    pub async fn emit(&self, msg: RtcMessage) {
        self.outbound_tx.send(msg).await.unwrap();
    }
}

#[async_trait]
impl MediaEngine for MockMediaEngine {
    async fn init_session(&self, config: SessionConfig, on_close: OnClose) -> Result<(), CallsError> {
        if self.fail_init.load(Ordering::SeqCst) {
            return Err(CallsError::MediaEngineFailure(
                "init session failed".to_string(),
            ));
        }
        self.sessions
            .lock()
            .unwrap()
            .insert(config.session_id.clone(), (config, on_close));
        Ok(())
    }

    async fn send(&self, msg: RtcMessage) -> Result<(), CallsError> {
        if !self.has_session(&msg.session_id) {
            return Err(CallsError::MediaEngineFailure(format!(
                "no media session {}",
                msg.session_id
            )));
        }
        self.sent.lock().unwrap().push(msg);
        Ok(())
    }

    async fn close_session(&self, session_id: &str) -> Result<(), CallsError> {
        self.sessions.lock().unwrap().remove(session_id);
        self.closed.lock().unwrap().push(session_id.to_string());
        Ok(())
    }

    fn take_receiver(&self) -> Option<mpsc::Receiver<RtcMessage>> {
        self.outbound_rx.lock().unwrap().take()
    }
}

/// Mock remote media coordination service.
pub struct MockMediaCoordinator {
    sent: Mutex<Vec<(CoordinatorMessage, String)>>,
    outbound_tx: mpsc::Sender<RtcMessage>,
    outbound_rx: Mutex<Option<mpsc::Receiver<RtcMessage>>>,
}

impl Default for MockMediaCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl MockMediaCoordinator {
    pub fn new() -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        Self {
            sent: Mutex::new(Vec::new()),
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
        }
    }

    /// Envelopes sent with the channel they were sent for, in order.
    pub fn sent(&self) -> Vec<(CoordinatorMessage, String)> {
        self.sent.lock().unwrap().clone()
    }

    /// Envelope kinds sent, in order.
    pub fn kinds(&self) -> Vec<&'static str> {
        self.sent().iter().map(|(msg, _)| msg.kind()).collect()
    }

    pub async fn emit(&self, msg: RtcMessage) {
        self.outbound_tx.send(msg).await.unwrap();
    }
}

#[async_trait]
impl MediaCoordinator for MockMediaCoordinator {
    async fn send(&self, msg: CoordinatorMessage, channel_id: &str) -> Result<(), CallsError> {
        self.sent
            .lock()
            .unwrap()
            .push((msg, channel_id.to_string()));
        Ok(())
    }

    fn take_receiver(&self) -> Option<mpsc::Receiver<RtcMessage>> {
        self.outbound_rx.lock().unwrap().take()
    }
}
