//! Join and leave paths.

use super::{best_effort, CallController};
use crate::authority::{resolve_authoritative_node, Route};
use crate::cluster::{ClusterMessage, ClusterMessageType};
use crate::errors::CallsError;
use crate::observability::metrics;
use crate::platform::{AnalyticsEvent, BroadcastTarget, CallEvent, ChannelType, Permission};
use crate::rtc::SessionConfig;
use crate::session::{Session, SessionIdentity, SessionPhase};
use crate::state::{CallState, ChannelState};

use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Why a session's leave path ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LeaveReason {
    Reconnected,
    Left,
    MediaClosed,
    Timeout,
}

impl LeaveReason {
    fn as_str(self) -> &'static str {
        match self {
            LeaveReason::Reconnected => "reconnected",
            LeaveReason::Left => "leave",
            LeaveReason::MediaClosed => "media_closed",
            LeaveReason::Timeout => "timeout",
        }
    }
}

impl CallController {
    /// Join task body. Failures are reported once to the joining user.
    pub(crate) async fn run_join(
        self: Arc<Self>,
        user_id: String,
        connection_id: String,
        channel_id: String,
        title: String,
    ) {
        let result = self
            .handle_join(&user_id, &connection_id, &channel_id, &title)
            .await;

        if let Err(e) = result {
            metrics::record_join(e.kind());
            warn!(
                target: "calls.lifecycle",
                user_id = %user_id,
                connection_id = %connection_id,
                channel_id = %channel_id,
                error = %e,
                "Join failed"
            );
            self.publish(
                CallEvent::Error,
                json!({"data": e.client_message(), "connID": connection_id}),
                BroadcastTarget::User(user_id),
                true,
            )
            .await;
        }
    }

    #[instrument(skip_all, fields(user_id = %user_id, connection_id = %connection_id, channel_id = %channel_id))]
    async fn handle_join(
        self: &Arc<Self>,
        user_id: &str,
        connection_id: &str,
        channel_id: &str,
        title: &str,
    ) -> Result<(), CallsError> {
        debug!(target: "calls.lifecycle", "Handling join");

        if !self
            .platform
            .permissions
            .has_permission(user_id, channel_id, Permission::CreatePost)
            .await
        {
            return Err(CallsError::Forbidden(format!(
                "user {user_id} cannot post in channel {channel_id}"
            )));
        }
        let channel = self.platform.channels.get_channel(channel_id).await?;
        if channel.archived {
            return Err(CallsError::ChannelUnavailable(format!(
                "channel {channel_id} is archived"
            )));
        }

        let (state, started) = self.add_session_to_call(user_id, connection_id, channel_id).await?;
        let call = state.call.as_ref().ok_or_else(|| {
            CallsError::Internal("call state missing after join".to_string())
        })?;

        if started {
            self.announce_call_start(user_id, channel_id, channel.channel_type, call, title)
                .await;
        }

        let authority = resolve_authoritative_node(&*self.platform.coordinator, Some(&state)).await;
        let route = Route::from_authority(self.node_id(), authority.as_deref(), self.rtc.is_remote());
        debug!(target: "calls.lifecycle", authority = ?authority, route = ?route, "Resolved authority");

        let session = Arc::new(Session::new(
            SessionIdentity::joined(user_id, channel_id, connection_id),
            !self.rtc.is_remote() && route.is_local(),
            &self.settings,
        ));
        self.registry.insert(Arc::clone(&session)).await;

        let outcome = self.attach_media(&session, &route).await;
        match &outcome {
            Ok(()) => {
                session.set_phase(SessionPhase::Active);
                self.publish(
                    CallEvent::Join,
                    json!({"connID": connection_id}),
                    BroadcastTarget::User(user_id.to_string()),
                    true,
                )
                .await;
                self.publish(
                    CallEvent::UserConnected,
                    json!({"userID": user_id}),
                    BroadcastTarget::Channel(channel_id.to_string()),
                    true,
                )
                .await;
                self.track(
                    AnalyticsEvent::UserJoined,
                    &[
                        ("ParticipantID", user_id),
                        ("ChannelID", channel_id),
                        ("CallID", &call.id),
                    ],
                );
                metrics::record_join("success");
                info!(target: "calls.lifecycle", call_id = %call.id, "User joined call");

                self.read_messages(&session, &route).await;
            }
            Err(_) => {
                // tear down right away instead of waiting out the grace period
                session.leave.fire();
            }
        }

        self.handle_leave(&session).await;
        outcome
    }

    /// Add the session to the channel's call, creating the call if needed.
    ///
    /// Returns the committed state and whether this join started the call.
    /// The started flag is decided by the attempt that committed.
    async fn add_session_to_call(
        &self,
        user_id: &str,
        connection_id: &str,
        channel_id: &str,
    ) -> Result<(ChannelState, bool), CallsError> {
        let claim_node = if self.rtc.is_remote() {
            ""
        } else {
            self.node_id()
        };
        let max_participants =
            usize::try_from(self.settings.max_participants).unwrap_or(usize::MAX);
        let now = chrono::Utc::now().timestamp_millis();
        let mut started = false;

        let state = self
            .state
            .update(channel_id, |state| {
                started = false;
                let mut state = state.unwrap_or_default();
                if state.node_id.is_empty() {
                    state.node_id = claim_node.to_string();
                }
                let call = state.call.get_or_insert_with(|| {
                    started = true;
                    CallState::new(user_id, now)
                });

                if max_participants > 0
                    && !call.users.contains_key(user_id)
                    && call.users.len() >= max_participants
                {
                    return Err(CallsError::CapacityExceeded(format!(
                        "call has {} participants",
                        call.users.len()
                    )));
                }
                call.add_session(user_id, connection_id);
                Ok(Some(state))
            })
            .await?
            .ok_or_else(|| CallsError::Internal("channel state missing after join".to_string()))?;

        Ok((state, started))
    }

    async fn announce_call_start(
        &self,
        user_id: &str,
        channel_id: &str,
        channel_type: ChannelType,
        call: &CallState,
        title: &str,
    ) {
        metrics::record_call_started();
        self.track(
            AnalyticsEvent::CallStarted,
            &[
                ("ParticipantID", user_id),
                ("CallID", &call.id),
                ("ChannelID", channel_id),
                ("ChannelType", channel_type.as_str()),
            ],
        );

        let thread_id = best_effort(
            "create call thread",
            self.platform
                .threads
                .start_call_thread(user_id, channel_id, call.start_at, title)
                .await,
        )
        .unwrap_or_default();

        if !thread_id.is_empty() {
            let call_id = call.id.clone();
            let stored = thread_id.clone();
            best_effort(
                "store call thread",
                self.update_call(channel_id, |c| {
                    if c.id == call_id {
                        c.thread_id.clone_from(&stored);
                    }
                    Ok(())
                })
                .await,
            );
        }

        info!(
            target: "calls.lifecycle",
            channel_id = %channel_id,
            call_id = %call.id,
            "Call started"
        );
        self.publish(
            CallEvent::CallStart,
            json!({
                "channelID": channel_id,
                "start_at": call.start_at,
                "thread_id": thread_id,
                "owner_id": call.owner_id,
            }),
            BroadcastTarget::Channel(channel_id.to_string()),
            true,
        )
        .await;
    }

    /// Connect the session to media: announce it to the remote service,
    /// start a local media session, or ask the authoritative peer to.
    async fn attach_media(self: &Arc<Self>, session: &Arc<Session>, route: &Route) -> Result<(), CallsError> {
        let identity = session.identity();

        if self.rtc.is_remote() {
            return self
                .rtc
                .join(&identity.channel_id, &identity.user_id, &identity.original_connection_id)
                .await
                .map_err(|e| CallsError::MediaEngineFailure(format!("failed to send join: {e}")));
        }

        match route {
            Route::Local => {
                debug!(target: "calls.lifecycle", "Initializing media session");
                // the media session outlives reconnects, so notify whichever
                // session holds the original connection when it closes
                let on_close = {
                    let controller = Arc::downgrade(self);
                    let original = identity.original_connection_id.clone();
                    let runtime = tokio::runtime::Handle::current();
                    Box::new(move || {
                        runtime.spawn(async move {
                            let Some(controller) = controller.upgrade() else {
                                return;
                            };
                            if let Some(current) = controller.registry.get_by_original(&original).await {
                                current.media_closed.fire();
                            }
                        });
                    })
                };
                self.rtc
                    .init_session(
                        SessionConfig::new(
                            &identity.channel_id,
                            &identity.user_id,
                            &identity.original_connection_id,
                        ),
                        on_close,
                    )
                    .await
                    .map_err(|e| {
                        CallsError::MediaEngineFailure(format!("failed to init session: {e}"))
                    })
            }
            Route::Relay(destination) => {
                let msg = ClusterMessage::new(
                    ClusterMessageType::Connect,
                    self.node_id(),
                    &identity.original_connection_id,
                    &identity.user_id,
                    &identity.channel_id,
                );
                self.relay.send(&msg, destination.clone())
            }
        }
    }

    /// Wait for the session to end, then tear it down.
    ///
    /// Returns without teardown if the session was superseded by a
    /// reconnect. Every teardown step is best-effort.
    #[instrument(skip_all, fields(connection_id = %session.connection_id(), channel_id = %session.channel_id()))]
    pub(crate) async fn handle_leave(self: &Arc<Self>, session: &Arc<Session>) {
        if session.transport_closed.is_fired()
            && !session.leave.is_fired()
            && !session.reconnect.is_fired()
        {
            session.set_phase(SessionPhase::Reconnecting);
        }

        let reason = tokio::select! {
            biased;
            () = session.reconnect.fired() => LeaveReason::Reconnected,
            () = session.leave.fired() => LeaveReason::Left,
            () = session.media_closed.fired() => LeaveReason::MediaClosed,
            () = tokio::time::sleep(self.settings.reconnect_grace_period) => LeaveReason::Timeout,
        };
        metrics::record_leave(reason.as_str());
        debug!(target: "calls.lifecycle", reason = reason.as_str(), "Leave path triggered");

        if reason == LeaveReason::Reconnected {
            session.set_phase(SessionPhase::Closed);
            // a session holding media stays registered as the anchor for
            // its media session until the authoritative close
            if !session.has_media_transport() {
                self.registry.remove(session).await;
            }
            return;
        }

        let identity = session.identity();
        let state = best_effort("read call state", self.state.get(&identity.channel_id).await).flatten();
        let call_id = state
            .as_ref()
            .and_then(|s| s.call.as_ref())
            .map(|c| c.id.clone());

        if state
            .as_ref()
            .and_then(|s| s.call.as_ref())
            .is_some_and(|c| c.screen_sharing_id == identity.user_id)
        {
            self.publish(
                CallEvent::UserScreenOff,
                json!({}),
                BroadcastTarget::Channel(identity.channel_id.clone()),
                true,
            )
            .await;
        }

        if reason != LeaveReason::MediaClosed {
            let authority = resolve_authoritative_node(&*self.platform.coordinator, state.as_ref()).await;
            self.close_media_session(session, authority.as_deref()).await;
        }

        self.registry.remove(session).await;
        best_effort(
            "remove session from call state",
            self.remove_session_from_call(session).await,
        );

        if let Some(call_id) = call_id {
            self.track(
                AnalyticsEvent::UserLeft,
                &[
                    ("ParticipantID", &identity.user_id),
                    ("ChannelID", &identity.channel_id),
                    ("CallID", &call_id),
                ],
            );
        }

        session.set_phase(if reason == LeaveReason::Left {
            SessionPhase::Left
        } else {
            SessionPhase::Closed
        });
        metrics::record_session_duration(session.age());
        info!(
            target: "calls.lifecycle",
            user_id = %identity.user_id,
            reason = reason.as_str(),
            "Session ended"
        );
    }

    /// Close the session's media: locally, through the remote service, or by
    /// asking the authoritative peer.
    pub(crate) async fn close_media_session(&self, session: &Session, authority: Option<&str>) {
        let identity = session.identity();
        let route = Route::from_authority(self.node_id(), authority, self.rtc.is_remote());

        match route {
            Route::Local => {
                best_effort(
                    "close media session",
                    self.rtc
                        .close_session(&identity.channel_id, &identity.original_connection_id)
                        .await,
                );
                self.drop_media_anchor(&identity.original_connection_id).await;
            }
            Route::Relay(destination) => {
                let msg = ClusterMessage::new(
                    ClusterMessageType::Disconnect,
                    self.node_id(),
                    &identity.original_connection_id,
                    &identity.user_id,
                    &identity.channel_id,
                );
                best_effort("relay disconnect", self.relay.send(&msg, destination));
            }
        }
    }

    /// Unregister a media anchor left behind for `original_connection_id`:
    /// a relayed session or one superseded by a reconnect elsewhere.
    pub(crate) async fn drop_media_anchor(&self, original_connection_id: &str) {
        let Some(anchor) = self.registry.get_by_original(original_connection_id).await else {
            return;
        };
        if anchor.is_relayed() || anchor.reconnect.is_fired() {
            self.registry.remove(&anchor).await;
        }
    }

    /// Remove the session's binding from the call. Deletes the record when
    /// nobody is left.
    async fn remove_session_from_call(&self, session: &Session) -> Result<(), CallsError> {
        let identity = session.identity();
        let mut user_left = false;
        let mut ended = false;

        self.state
            .update(&identity.channel_id, |state| {
                user_left = false;
                ended = false;
                let Some(mut state) = state else {
                    return Ok(None);
                };
                let Some(call) = state.call.as_mut() else {
                    return Ok(Some(state));
                };
                user_left = call.remove_session(&identity.user_id, &identity.original_connection_id);
                if call.is_empty() {
                    ended = true;
                    return Ok(None);
                }
                Ok(Some(state))
            })
            .await?;

        if user_left {
            self.publish(
                CallEvent::UserDisconnected,
                json!({"userID": identity.user_id}),
                BroadcastTarget::Channel(identity.channel_id.clone()),
                true,
            )
            .await;
        }
        if ended {
            metrics::record_call_ended();
            info!(target: "calls.lifecycle", channel_id = %identity.channel_id, "Call ended");
            self.publish(
                CallEvent::CallEnd,
                json!({"channelID": identity.channel_id}),
                BroadcastTarget::Channel(identity.channel_id.clone()),
                true,
            )
            .await;
        }
        Ok(())
    }
}
