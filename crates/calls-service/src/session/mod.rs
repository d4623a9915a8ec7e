//! Per-connection call sessions.
//!
//! A [`Session`] is one connection's participation in a call. It is owned by
//! the node that accepted the connection and referenced by the
//! [`SessionRegistry`]. Lifecycle transitions are driven by four one-shot
//! [`Signal`]s observed by the session's read loop and by the leave path.

pub mod registry;

pub use registry::SessionRegistry;

use crate::client::ClientMessage;
use crate::config::ControllerSettings;
use crate::errors::CallsError;
use crate::ratelimit::RateLimiter;

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// One-shot lifecycle signal.
///
/// Firing is idempotent; only the first call to [`Signal::fire`] reports
/// `true`, so callers can tell whether they were the one that fired it.
#[derive(Debug, Default)]
pub struct Signal {
    fired: AtomicBool,
    token: CancellationToken,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the signal. Returns `true` only for the call that fired it.
    pub fn fire(&self) -> bool {
        if self
            .fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.token.cancel();
            true
        } else {
            false
        }
    }

    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Resolves once the signal has fired.
    pub async fn fired(&self) {
        self.token.cancelled().await;
    }
}

/// Observable session phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionPhase {
    Joining = 0,
    Active = 1,
    Reconnecting = 2,
    Left = 3,
    Closed = 4,
}

impl SessionPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionPhase::Joining,
            1 => SessionPhase::Active,
            2 => SessionPhase::Reconnecting,
            3 => SessionPhase::Left,
            _ => SessionPhase::Closed,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionPhase::Joining => "joining",
            SessionPhase::Active => "active",
            SessionPhase::Reconnecting => "reconnecting",
            SessionPhase::Left => "left",
            SessionPhase::Closed => "closed",
        }
    }
}

/// Identifiers of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    /// Current connection ID (changes on reconnect).
    pub connection_id: String,
    /// Connection ID of the first join, stable across reconnects. Media
    /// sessions are keyed by it.
    pub original_connection_id: String,
    pub user_id: String,
    pub channel_id: String,
}

impl SessionIdentity {
    /// Identity for a fresh join, where current and original IDs match.
    pub fn joined(user_id: &str, channel_id: &str, connection_id: &str) -> Self {
        Self {
            connection_id: connection_id.to_string(),
            original_connection_id: connection_id.to_string(),
            user_id: user_id.to_string(),
            channel_id: channel_id.to_string(),
        }
    }
}

/// One connection's participation in a call.
#[derive(Debug)]
pub struct Session {
    identity: SessionIdentity,
    has_media_transport: bool,
    relayed: bool,
    limiter: RateLimiter,
    queue_tx: mpsc::Sender<ClientMessage>,
    queue_rx: Mutex<Option<mpsc::Receiver<ClientMessage>>>,
    phase: AtomicU8,
    created_at: Instant,

    /// Superseded by a reconnect.
    pub reconnect: Signal,
    /// Explicit leave from the client.
    pub leave: Signal,
    /// Client transport closed without a leave.
    pub transport_closed: Signal,
    /// Media transport closed under us.
    pub media_closed: Signal,
}

impl Session {
    /// Session for a locally accepted connection.
    pub fn new(
        identity: SessionIdentity,
        has_media_transport: bool,
        settings: &ControllerSettings,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(settings.session_queue_capacity.max(1));
        Self {
            identity,
            has_media_transport,
            relayed: false,
            limiter: RateLimiter::new(settings.rate_limit_per_second, settings.rate_limit_burst),
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            phase: AtomicU8::new(SessionPhase::Joining as u8),
            created_at: Instant::now(),
            reconnect: Signal::new(),
            leave: Signal::new(),
            transport_closed: Signal::new(),
            media_closed: Signal::new(),
        }
    }

    /// Media-anchor session created on the authoritative node on behalf of
    /// a peer. Nothing consumes its queue.
    pub fn relayed(identity: SessionIdentity, settings: &ControllerSettings) -> Self {
        let mut session = Self::new(identity, true, settings);
        session.relayed = true;
        session.set_phase(SessionPhase::Active);
        session
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    pub fn connection_id(&self) -> &str {
        &self.identity.connection_id
    }

    pub fn original_connection_id(&self) -> &str {
        &self.identity.original_connection_id
    }

    pub fn user_id(&self) -> &str {
        &self.identity.user_id
    }

    pub fn channel_id(&self) -> &str {
        &self.identity.channel_id
    }

    /// Whether this node holds the live media link for the session.
    pub fn has_media_transport(&self) -> bool {
        self.has_media_transport
    }

    pub fn is_relayed(&self) -> bool {
        self.relayed
    }

    pub fn phase(&self) -> SessionPhase {
        SessionPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub fn set_phase(&self, phase: SessionPhase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    /// Time since the session was created.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Rate limiter admission for one inbound message.
    pub fn allow(&self) -> bool {
        self.limiter.allow()
    }

    /// Queue an inbound message without blocking.
    ///
    /// # Errors
    ///
    /// `CallsError::Internal` when the queue is full or its reader is gone.
    pub fn enqueue(&self, msg: ClientMessage) -> Result<(), CallsError> {
        self.queue_tx.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(msg) => CallsError::Internal(format!(
                "session queue full, dropping {} message",
                msg.msg_type.as_str()
            )),
            mpsc::error::TrySendError::Closed(_) => {
                CallsError::Internal("session queue closed".to_string())
            }
        })
    }

    /// Take the inbound queue. Only the first caller gets it.
    pub fn take_receiver(&self) -> Option<mpsc::Receiver<ClientMessage>> {
        self.queue_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Whether any terminal signal has fired.
    pub fn is_terminated(&self) -> bool {
        self.reconnect.is_fired()
            || self.leave.is_fired()
            || self.transport_closed.is_fired()
            || self.media_closed.is_fired()
    }

    /// Resolves when any signal that ends the read loop fires.
    pub async fn terminated(&self) {
        tokio::select! {
            () = self.reconnect.fired() => {}
            () = self.leave.fired() => {}
            () = self.transport_closed.fired() => {}
            () = self.media_closed.fired() => {}
        }
    }
}
