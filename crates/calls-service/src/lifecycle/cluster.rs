//! Applying messages relayed by peer nodes.

use super::{best_effort, CallController};
use crate::cluster::{ClusterMessage, ClusterMessageType};
use crate::observability::metrics;
use crate::rtc::SessionConfig;
use crate::session::{Session, SessionIdentity};

use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

impl CallController {
    /// Consume the cluster subscription until shutdown.
    pub(crate) async fn run_cluster_consumer(self: Arc<Self>, mut inbound: mpsc::Receiver<Bytes>) {
        info!(target: "calls.cluster", node_id = %self.node_id(), "Cluster consumer started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => break,
                payload = inbound.recv() => {
                    let Some(payload) = payload else {
                        warn!(target: "calls.cluster", "Cluster subscription closed");
                        break;
                    };
                    match ClusterMessage::decode(&payload) {
                        Ok(msg) => self.handle_cluster_message(msg).await,
                        Err(e) => warn!(target: "calls.cluster", error = %e, "Dropping undecodable cluster message"),
                    }
                }
            }
        }

        info!(target: "calls.cluster", node_id = %self.node_id(), "Cluster consumer stopped");
    }

    /// Apply one peer message on this node.
    #[instrument(skip_all, fields(msg_type = msg.msg_type.as_str(), connection_id = %msg.connection_id))]
    pub async fn handle_cluster_message(self: &Arc<Self>, msg: ClusterMessage) {
        let kind = msg.msg_type.as_str();
        if msg.sender_node_id == self.node_id() {
            metrics::record_relay_message(kind, "ignored");
            return;
        }
        metrics::record_relay_message(kind, "received");
        debug!(target: "calls.cluster", sender = %msg.sender_node_id, "Cluster message received");

        match msg.msg_type {
            ClusterMessageType::Connect => self.open_relayed_session(msg).await,
            ClusterMessageType::Disconnect => {
                best_effort(
                    "close relayed media session",
                    self.rtc.close_session(&msg.channel_id, &msg.connection_id).await,
                );
                self.drop_media_anchor(&msg.connection_id).await;
            }
            ClusterMessageType::Signaling | ClusterMessageType::UserState => {
                let Some(client_message) = &msg.client_message else {
                    warn!(target: "calls.cluster", "Relayed message without client payload");
                    return;
                };
                best_effort(
                    "dispatch relayed message",
                    self.rtc
                        .dispatch(&msg.channel_id, &msg.connection_id, client_message)
                        .await,
                );
            }
            ClusterMessageType::Reconnect => {
                if let Some(session) = self.registry.get(&msg.connection_id).await {
                    if session.reconnect.fire() {
                        debug!(target: "calls.cluster", "Local session superseded by remote reconnect");
                    }
                }
            }
            ClusterMessageType::Leave => {
                if let Some(session) = self.registry.get(&msg.connection_id).await {
                    session.leave.fire();
                }
            }
        }
    }

    /// Start a media session on behalf of a peer node.
    async fn open_relayed_session(self: &Arc<Self>, msg: ClusterMessage) {
        if self.rtc.is_remote() {
            debug!(target: "calls.cluster", "Ignoring connect, media is remote");
            return;
        }

        let identity = SessionIdentity::joined(&msg.user_id, &msg.channel_id, &msg.connection_id);
        let anchor = Arc::new(Session::relayed(identity, &self.settings));
        self.registry.insert(Arc::clone(&anchor)).await;

        let on_close = {
            let controller = Arc::downgrade(self);
            let anchor = Arc::clone(&anchor);
            let runtime = tokio::runtime::Handle::current();
            Box::new(move || {
                anchor.media_closed.fire();
                runtime.spawn(async move {
                    if let Some(controller) = controller.upgrade() {
                        controller.registry.remove(&anchor).await;
                    }
                });
            })
        };

        let config = SessionConfig::new(&msg.channel_id, &msg.user_id, &msg.connection_id);
        if let Err(e) = self.rtc.init_session(config, on_close).await {
            warn!(
                target: "calls.cluster",
                user_id = %msg.user_id,
                channel_id = %msg.channel_id,
                error = %e,
                "Failed to init relayed media session"
            );
            self.registry.remove(&anchor).await;
        }
    }
}
