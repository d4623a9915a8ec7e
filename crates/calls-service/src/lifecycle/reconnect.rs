//! Reconnect path.

use super::{best_effort, CallController};
use crate::authority::{resolve_authoritative_node, Route};
use crate::cluster::{ClusterMessage, ClusterMessageType, Destination};
use crate::errors::CallsError;
use crate::observability::metrics;
use crate::platform::Permission;
use crate::session::{Session, SessionIdentity, SessionPhase};

use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

impl CallController {
    /// Reconnect task body. Failures are logged only.
    pub(crate) async fn run_reconnect(
        self: Arc<Self>,
        user_id: String,
        connection_id: String,
        channel_id: String,
        original_connection_id: String,
        previous_connection_id: String,
    ) {
        let identity = SessionIdentity {
            connection_id,
            original_connection_id,
            user_id,
            channel_id,
        };
        if let Err(e) = self.handle_reconnect(identity.clone(), &previous_connection_id).await {
            metrics::record_reconnect(e.kind());
            warn!(
                target: "calls.lifecycle",
                user_id = %identity.user_id,
                connection_id = %identity.connection_id,
                original_connection_id = %identity.original_connection_id,
                previous_connection_id = %previous_connection_id,
                channel_id = %identity.channel_id,
                error = %e,
                "Reconnect failed"
            );
        }
    }

    #[instrument(skip_all, fields(
        connection_id = %identity.connection_id,
        original_connection_id = %identity.original_connection_id,
        previous_connection_id = %previous_connection_id,
        channel_id = %identity.channel_id
    ))]
    async fn handle_reconnect(
        self: &Arc<Self>,
        identity: SessionIdentity,
        previous_connection_id: &str,
    ) -> Result<(), CallsError> {
        debug!(target: "calls.lifecycle", "Handling reconnect");

        if !self
            .platform
            .permissions
            .has_permission(&identity.user_id, &identity.channel_id, Permission::CreatePost)
            .await
        {
            return Err(CallsError::Forbidden(format!(
                "user {} cannot post in channel {}",
                identity.user_id, identity.channel_id
            )));
        }

        let state = self.state.get(&identity.channel_id).await?;
        let call = state
            .as_ref()
            .and_then(|s| s.call.as_ref())
            .ok_or_else(|| CallsError::CallStateNotFound(identity.channel_id.clone()))?;
        if !call.sessions.contains_key(&identity.original_connection_id) {
            return Err(CallsError::SessionNotFound(
                identity.original_connection_id.clone(),
            ));
        }

        let authority = resolve_authoritative_node(&*self.platform.coordinator, state.as_ref()).await;
        let route = Route::from_authority(self.node_id(), authority.as_deref(), self.rtc.is_remote());

        let session = Arc::new(Session::new(
            identity,
            !self.rtc.is_remote() && route.is_local(),
            &self.settings,
        ));
        let previous = self
            .registry
            .replace(previous_connection_id, Arc::clone(&session))
            .await?;
        if previous.is_none() {
            debug!(target: "calls.lifecycle", "No local session for previous connection");
        }

        let identity = session.identity();
        let msg = ClusterMessage::new(
            ClusterMessageType::Reconnect,
            self.node_id(),
            previous_connection_id,
            &identity.user_id,
            &identity.channel_id,
        );
        best_effort("relay reconnect", self.relay.send(&msg, Destination::Broadcast));

        let outcome = self
            .rtc
            .reconnect(&identity.channel_id, &identity.original_connection_id)
            .await
            .map_err(|e| CallsError::MediaEngineFailure(format!("failed to send reconnect: {e}")));

        match &outcome {
            Ok(()) => {
                session.set_phase(SessionPhase::Active);
                metrics::record_reconnect("success");
                info!(target: "calls.lifecycle", user_id = %identity.user_id, "Session reconnected");
                self.read_messages(&session, &route).await;
            }
            Err(_) => {
                session.leave.fire();
            }
        }

        self.handle_leave(&session).await;
        outcome
    }
}
