//! Media backend to client signal delivery.

use super::CallController;
use crate::platform::{BroadcastTarget, CallEvent};
use crate::rtc::RtcMessage;

use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

impl CallController {
    /// Publish every outbound media message to the user owning the session.
    pub(crate) async fn run_signal_writer(self: Arc<Self>, mut receiver: mpsc::Receiver<RtcMessage>) {
        info!(target: "calls.rtc", "Signal writer started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => break,
                msg = receiver.recv() => {
                    let Some(msg) = msg else { break };
                    self.deliver_signal(msg).await;
                }
            }
        }

        info!(target: "calls.rtc", "Signal writer stopped");
    }

    async fn deliver_signal(&self, msg: RtcMessage) {
        let session = match self.registry.get_by_original(&msg.session_id).await {
            Some(session) => Some(session),
            None => self.registry.get(&msg.session_id).await,
        };
        let Some(session) = session else {
            warn!(
                target: "calls.rtc",
                session_id = %msg.session_id,
                "No session for outbound media message"
            );
            return;
        };

        self.publish(
            CallEvent::Signal,
            json!({
                "data": String::from_utf8_lossy(&msg.data),
                "connID": msg.session_id,
            }),
            BroadcastTarget::User(session.user_id().to_string()),
            true,
        )
        .await;
    }
}
