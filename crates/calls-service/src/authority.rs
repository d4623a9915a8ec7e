//! Which node hosts the media transport for a channel.

use crate::cluster::Destination;
use crate::platform::ClusterCoordinator;
use crate::state::ChannelState;

use tracing::warn;

/// Resolve the authoritative node: the cluster coordinator's elected node if
/// it names one, otherwise the node recorded in the channel state.
pub async fn resolve_authoritative_node(
    coordinator: &dyn ClusterCoordinator,
    state: Option<&ChannelState>,
) -> Option<String> {
    let elected = match coordinator.handler_node_id().await {
        Ok(node_id) => node_id.filter(|id| !id.is_empty()),
        Err(e) => {
            warn!(target: "calls.lifecycle", error = %e, "Failed to query handler node");
            None
        }
    };

    elected.or_else(|| {
        state
            .map(|s| s.node_id.clone())
            .filter(|id| !id.is_empty())
    })
}

/// Where media work for a session is carried out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Through this node's media backend.
    Local,
    /// Relayed to another node.
    Relay(Destination),
}

impl Route {
    /// Route from this node's point of view.
    ///
    /// With a remote media service every node talks to it directly. With a
    /// local engine, work goes to the authoritative node; an unknown
    /// authority is reached by broadcast.
    pub fn from_authority(self_node_id: &str, authority: Option<&str>, remote_media: bool) -> Self {
        if remote_media {
            return Route::Local;
        }
        match authority {
            Some(node_id) if node_id == self_node_id => Route::Local,
            Some(node_id) => Route::Relay(Destination::Node(node_id.to_string())),
            None => Route::Relay(Destination::Broadcast),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Route::Local)
    }
}
