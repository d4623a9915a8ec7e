//! Per-session read loop and client message handlers.

use super::{best_effort, CallController};
use crate::authority::Route;
use crate::client::{ClientMessage, ClientMessageType};
use crate::cluster::{ClusterMessage, ClusterMessageType};
use crate::errors::CallsError;
use crate::observability::metrics;
use crate::platform::{BroadcastTarget, CallEvent};
use crate::session::Session;

use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Default, Deserialize)]
struct ScreenOnData {
    #[serde(rename = "screenStreamID", default)]
    screen_stream_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct ReactionData {
    #[serde(default)]
    emoji: String,
}

impl CallController {
    /// Process queued client messages in arrival order until a terminal
    /// signal fires.
    ///
    /// Signals are checked between messages. A handler that has started
    /// always runs to completion, since its state change and the matching
    /// broadcast or media dispatch must not be split.
    pub(crate) async fn read_messages(self: &Arc<Self>, session: &Arc<Session>, route: &Route) {
        let Some(mut queue) = session.take_receiver() else {
            warn!(target: "calls.lifecycle", "Session queue already taken");
            return;
        };

        loop {
            let msg = tokio::select! {
                biased;
                () = session.terminated() => break,
                msg = queue.recv() => msg,
            };
            let Some(msg) = msg else { break };
            self.handle_client_message(session, route, msg).await;
        }
        debug!(
            target: "calls.lifecycle",
            connection_id = %session.connection_id(),
            "Read loop finished"
        );
    }

    async fn handle_client_message(&self, session: &Session, route: &Route, msg: ClientMessage) {
        metrics::record_ws_event("in", msg.msg_type.as_str());
        let channel = BroadcastTarget::Channel(session.channel_id().to_string());
        let user_id = session.user_id();

        match msg.msg_type {
            ClientMessageType::Sdp | ClientMessageType::Ice => {
                best_effort(
                    "forward signaling",
                    self.forward_media(session, route, ClusterMessageType::Signaling, &msg)
                        .await,
                );
            }
            ClientMessageType::Mute | ClientMessageType::Unmute => {
                let unmuted = msg.msg_type == ClientMessageType::Unmute;
                best_effort(
                    "forward mute state",
                    self.forward_media(session, route, ClusterMessageType::UserState, &msg)
                        .await,
                );
                best_effort(
                    "store mute state",
                    self.update_call(session.channel_id(), |call| {
                        call.set_unmuted(user_id, unmuted);
                        Ok(())
                    })
                    .await,
                );
                let event = if unmuted {
                    CallEvent::UserUnmuted
                } else {
                    CallEvent::UserMuted
                };
                self.publish(event, json!({"userID": user_id}), channel, true)
                    .await;
            }
            ClientMessageType::VoiceOn | ClientMessageType::VoiceOff => {
                let event = if msg.msg_type == ClientMessageType::VoiceOn {
                    CallEvent::UserVoiceOn
                } else {
                    CallEvent::UserVoiceOff
                };
                self.publish(event, json!({"userID": user_id}), channel, true)
                    .await;
            }
            ClientMessageType::ScreenOn | ClientMessageType::ScreenOff => {
                // a rejected share is logged and otherwise dropped
                if let Err(e) = self.handle_screen_share(session, route, &msg).await {
                    warn!(
                        target: "calls.lifecycle",
                        user_id = %user_id,
                        msg_type = msg.msg_type.as_str(),
                        error = %e,
                        "Screen share change rejected"
                    );
                }
            }
            ClientMessageType::RaiseHand | ClientMessageType::UnraiseHand => {
                let raised = msg.msg_type == ClientMessageType::RaiseHand;
                let raised_at = if raised {
                    chrono::Utc::now().timestamp_millis()
                } else {
                    0
                };
                best_effort(
                    "store raised hand",
                    self.update_call(session.channel_id(), |call| {
                        call.set_raised_hand(user_id, raised_at);
                        Ok(())
                    })
                    .await,
                );
                let event = if raised {
                    CallEvent::UserRaiseHand
                } else {
                    CallEvent::UserUnraiseHand
                };
                self.publish(
                    event,
                    json!({"userID": user_id, "raised_hand": raised_at}),
                    channel,
                    true,
                )
                .await;
            }
            ClientMessageType::React => {
                let reaction: ReactionData = serde_json::from_slice(&msg.data).unwrap_or_else(|e| {
                    warn!(target: "calls.lifecycle", error = %e, "Invalid reaction payload");
                    ReactionData::default()
                });
                self.publish(
                    CallEvent::UserReaction,
                    json!({
                        "userID": user_id,
                        "emoji": reaction.emoji,
                        "timestamp": chrono::Utc::now().timestamp_millis(),
                    }),
                    channel,
                    false,
                )
                .await;
            }
            ClientMessageType::Join | ClientMessageType::Leave | ClientMessageType::Reconnect => {
                warn!(
                    target: "calls.lifecycle",
                    msg_type = msg.msg_type.as_str(),
                    "Invalid client message in session queue"
                );
            }
        }
    }

    /// Enforce screen share exclusivity, then forward and announce.
    async fn handle_screen_share(&self, session: &Session, route: &Route, msg: &ClientMessage) -> Result<(), CallsError> {
        let starting = msg.msg_type == ClientMessageType::ScreenOn;
        let stream_id = if starting {
            serde_json::from_slice::<ScreenOnData>(&msg.data)
                .map_err(|e| CallsError::InvalidMessage(format!("invalid screen_on data: {e}")))?
                .screen_stream_id
        } else {
            String::new()
        };

        let user_id = session.user_id();
        self.update_call(session.channel_id(), |call| {
            if starting {
                call.start_screen_share(user_id, &stream_id)
            } else {
                call.stop_screen_share(user_id)
            }
        })
        .await?;

        self.forward_media(session, route, ClusterMessageType::UserState, msg)
            .await?;

        let event = if starting {
            CallEvent::UserScreenOn
        } else {
            CallEvent::UserScreenOff
        };
        self.publish(
            event,
            json!({"userID": user_id}),
            BroadcastTarget::Channel(session.channel_id().to_string()),
            true,
        )
        .await;
        Ok(())
    }

    /// Send a media-affecting message to this node's backend or relay it to
    /// the authoritative node.
    async fn forward_media(
        &self,
        session: &Session,
        route: &Route,
        relay_type: ClusterMessageType,
        msg: &ClientMessage,
    ) -> Result<(), CallsError> {
        let identity = session.identity();
        match route {
            Route::Local => {
                self.rtc
                    .dispatch(&identity.channel_id, &identity.original_connection_id, msg)
                    .await
            }
            Route::Relay(destination) => {
                let envelope = ClusterMessage::new(
                    relay_type,
                    self.node_id(),
                    &identity.original_connection_id,
                    &identity.user_id,
                    &identity.channel_id,
                )
                .with_client_message(msg.clone());
                self.relay.send(&envelope, destination.clone())
            }
        }
    }
}
