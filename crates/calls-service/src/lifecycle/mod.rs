//! Session lifecycle manager.
//!
//! [`CallController`] is the orchestrator: it accepts client websocket
//! traffic from the host, drives join, reconnect and leave for each
//! connection, keeps channel call state consistent through the CAS store,
//! and routes media work either to this node's backend or to the
//! authoritative peer through the cluster relay.
//!
//! # Task Model
//!
//! - Join and reconnect each run as their own task per connection; the task
//!   lives until the session's leave path completes.
//! - Inside that task the read loop drains the session queue in arrival
//!   order while watching the session's terminal signals.
//! - Two background tasks per node: the signal writer (media backend to
//!   clients) and the cluster consumer (peer messages to this node).

mod cluster;
mod join;
mod messages;
mod reconnect;
mod signal;

use crate::client::{decode_request, ClientMessageType, ClientRequest, WebSocketRequest};
use crate::cluster::{
    ClusterMessage, ClusterMessageType, ClusterRelay, ClusterTransport, Destination,
};
use crate::config::ControllerSettings;
use crate::errors::CallsError;
use crate::observability::metrics;
use crate::platform::{AnalyticsEvent, BroadcastTarget, CallEvent, Platform};
use crate::rtc::{MediaBackend, RtcDispatcher};
use crate::session::SessionRegistry;
use crate::state::{CallState, CallStateStore};

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

/// Log and swallow the failure of a cleanup step that must not stop the
/// steps after it.
pub(crate) fn best_effort<T>(step: &'static str, result: Result<T, CallsError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(
                target: "calls.lifecycle",
                step = step,
                error = %e,
                "Best-effort step failed"
            );
            None
        }
    }
}

/// Call session orchestrator for one node.
pub struct CallController {
    settings: ControllerSettings,
    state: CallStateStore,
    registry: SessionRegistry,
    relay: ClusterRelay,
    rtc: RtcDispatcher,
    platform: Platform,
    tasks: TaskTracker,
    cancel_token: CancellationToken,
}

impl CallController {
    pub fn new(
        settings: ControllerSettings,
        state: CallStateStore,
        transport: Arc<dyn ClusterTransport>,
        media: MediaBackend,
        platform: Platform,
        cancel_token: CancellationToken,
    ) -> Arc<Self> {
        let relay = ClusterRelay::new(
            &settings.node_id,
            transport,
            settings.relay_queue_capacity,
            cancel_token.child_token(),
        );
        Arc::new(Self {
            settings,
            state,
            registry: SessionRegistry::new(),
            relay,
            rtc: RtcDispatcher::new(media),
            platform,
            tasks: TaskTracker::new(),
            cancel_token,
        })
    }

    pub fn node_id(&self) -> &str {
        &self.settings.node_id
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    pub fn state(&self) -> &CallStateStore {
        &self.state
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Start the cluster consumer and, when the media backend exposes one,
    /// the signal writer.
    ///
    /// # Errors
    ///
    /// Fails if the cluster subscription cannot be established.
    pub async fn spawn_background_tasks(self: &Arc<Self>) -> Result<Vec<JoinHandle<()>>, CallsError> {
        let mut handles = Vec::with_capacity(2);

        let inbound = self.relay.transport().subscribe(self.node_id()).await?;
        handles.push(tokio::spawn(Arc::clone(self).run_cluster_consumer(inbound)));

        if let Some(receiver) = self.rtc.take_receiver() {
            handles.push(tokio::spawn(Arc::clone(self).run_signal_writer(receiver)));
        }

        info!(
            target: "calls.lifecycle",
            node_id = %self.node_id(),
            tasks = handles.len(),
            "Background tasks started"
        );
        Ok(handles)
    }

    /// Host hook for an inbound client websocket request.
    #[instrument(skip_all, fields(connection_id = %connection_id, user_id = %user_id))]
    pub async fn handle_websocket_message(
        self: &Arc<Self>,
        connection_id: &str,
        user_id: &str,
        request: WebSocketRequest,
    ) {
        let Some(msg_type) =
            ClientMessageType::from_action(&self.settings.action_prefix, &request.action)
        else {
            debug!(target: "calls.lifecycle", action = %request.action, "Ignoring unknown action");
            return;
        };

        let session = self.registry.get(connection_id).await;
        if session.is_none() && !msg_type.is_session_control() {
            return;
        }

        if let Some(session) = &session {
            if !session.allow() {
                metrics::record_message_dropped("rate_limited");
                warn!(
                    target: "calls.ratelimit",
                    msg_type = msg_type.as_str(),
                    user_id = %session.user_id(),
                    connection_id = %connection_id,
                    "Message was dropped by rate limiter"
                );
                return;
            }
        }

        let request = match decode_request(msg_type, &request.data) {
            Ok(request) => request,
            Err(e) => {
                warn!(
                    target: "calls.lifecycle",
                    msg_type = msg_type.as_str(),
                    error = %e,
                    "Dropping malformed client message"
                );
                return;
            }
        };

        match request {
            ClientRequest::Join { channel_id, title } => {
                metrics::record_ws_event("in", "join");
                let this = Arc::clone(self);
                let (user_id, connection_id) = (user_id.to_string(), connection_id.to_string());
                self.tasks.spawn(async move {
                    this.run_join(user_id, connection_id, channel_id, title).await;
                });
            }
            ClientRequest::Reconnect {
                channel_id,
                original_connection_id,
                previous_connection_id,
            } => {
                metrics::record_ws_event("in", "reconnect");
                let this = Arc::clone(self);
                let (user_id, connection_id) = (user_id.to_string(), connection_id.to_string());
                self.tasks.spawn(async move {
                    this.run_reconnect(
                        user_id,
                        connection_id,
                        channel_id,
                        original_connection_id,
                        previous_connection_id,
                    )
                    .await;
                });
            }
            ClientRequest::Leave => {
                metrics::record_ws_event("in", "leave");
                debug!(target: "calls.lifecycle", "Leave message");
                if let Some(session) = &session {
                    session.leave.fire();
                }
                let msg = ClusterMessage::new(
                    ClusterMessageType::Leave,
                    self.node_id(),
                    connection_id,
                    user_id,
                    "",
                );
                best_effort("relay leave", self.relay.send(&msg, Destination::Broadcast));
            }
            ClientRequest::Message(msg) => {
                let Some(session) = session else { return };
                if let Err(e) = session.enqueue(msg) {
                    metrics::record_message_dropped("queue_full");
                    warn!(
                        target: "calls.lifecycle",
                        connection_id = %connection_id,
                        error = %e,
                        "Dropping client message"
                    );
                }
            }
        }
    }

    /// Host hook for a closed client websocket.
    #[instrument(skip_all, fields(connection_id = %connection_id))]
    pub async fn handle_websocket_disconnect(&self, connection_id: &str) {
        let Some(session) = self.registry.get(connection_id).await else {
            return;
        };
        if session.transport_closed.fire() {
            debug!(
                target: "calls.lifecycle",
                user_id = %session.user_id(),
                channel_id = %session.channel_id(),
                "Client transport closed"
            );
        } else {
            warn!(
                target: "calls.lifecycle",
                user_id = %session.user_id(),
                "Client transport already closed"
            );
        }
    }

    /// Leave every local session, then stop background work.
    ///
    /// Waits up to `timeout` for leave paths to finish.
    pub async fn shutdown(&self, timeout: Duration) {
        let sessions = self.registry.snapshot().await;
        info!(
            target: "calls.lifecycle",
            sessions = sessions.len(),
            "Shutting down call controller"
        );
        for session in &sessions {
            session.leave.fire();
        }

        self.tasks.close();
        if tokio::time::timeout(timeout, self.tasks.wait()).await.is_err() {
            warn!(target: "calls.lifecycle", "Timed out waiting for sessions to leave");
        }
        self.cancel_token.cancel();
    }

    async fn publish(&self, event: CallEvent, payload: Value, target: BroadcastTarget, reliable: bool) {
        metrics::record_ws_event("out", event.as_str());
        self.platform
            .events
            .publish(event, payload, target, reliable)
            .await;
    }

    fn track(&self, event: AnalyticsEvent, properties: &[(&str, &str)]) {
        let properties: HashMap<String, String> = properties
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        self.platform.analytics.track(event, properties);
    }

    /// Run `mutate` against the call in progress on `channel_id`.
    async fn update_call<F>(&self, channel_id: &str, mut mutate: F) -> Result<(), CallsError>
    where
        F: FnMut(&mut CallState) -> Result<(), CallsError> + Send,
    {
        self.state
            .update(channel_id, |state| {
                let mut state = state.ok_or_else(|| {
                    CallsError::CallStateMissing("channel state is missing from store".to_string())
                })?;
                let call = state.call.as_mut().ok_or_else(|| {
                    CallsError::CallStateMissing(
                        "call state is missing from channel state".to_string(),
                    )
                })?;
                mutate(call)?;
                Ok(Some(state))
            })
            .await
            .map(|_| ())
    }
}
