//! Cross-node message relay.
//!
//! Nodes exchange [`ClusterMessage`]s to reach the node holding the media
//! transport for a session. Delivery is fire-and-forget: the sender enqueues
//! and moves on, and each destination queue is drained by its own worker so
//! per-destination order is kept.

pub mod redis;
pub mod relay;

pub use self::redis::RedisClusterTransport;
pub use relay::ClusterRelay;

use crate::client::ClientMessage;
use crate::errors::CallsError;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Cluster message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterMessageType {
    /// Create a media session on the receiving (authoritative) node.
    Connect,
    /// Close a media session on the receiving node.
    Disconnect,
    /// SDP or ICE for a relayed session.
    Signaling,
    /// Mute, unmute or screen state for a relayed session.
    UserState,
    /// The named connection was superseded by a reconnect.
    Reconnect,
    /// The named connection's user left.
    Leave,
}

impl ClusterMessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            ClusterMessageType::Connect => "connect",
            ClusterMessageType::Disconnect => "disconnect",
            ClusterMessageType::Signaling => "signaling",
            ClusterMessageType::UserState => "user_state",
            ClusterMessageType::Reconnect => "reconnect",
            ClusterMessageType::Leave => "leave",
        }
    }
}

/// Envelope exchanged between nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterMessage {
    #[serde(rename = "type")]
    pub msg_type: ClusterMessageType,
    pub sender_node_id: String,
    pub connection_id: String,
    pub user_id: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_message: Option<ClientMessage>,
}

impl ClusterMessage {
    pub fn new(
        msg_type: ClusterMessageType,
        sender_node_id: &str,
        connection_id: &str,
        user_id: &str,
        channel_id: &str,
    ) -> Self {
        Self {
            msg_type,
            sender_node_id: sender_node_id.to_string(),
            connection_id: connection_id.to_string(),
            user_id: user_id.to_string(),
            channel_id: channel_id.to_string(),
            client_message: None,
        }
    }

    #[must_use]
    pub fn with_client_message(mut self, msg: ClientMessage) -> Self {
        self.client_message = Some(msg);
        self
    }

    pub fn encode(&self) -> Result<Bytes, CallsError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn decode(payload: &[u8]) -> Result<Self, CallsError> {
        serde_json::from_slice(payload).map_err(|e| {
            CallsError::Serialization(format!("failed to decode cluster message: {e}"))
        })
    }
}

/// Message destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Destination {
    Node(String),
    Broadcast,
}

impl Destination {
    /// Pub/sub channel name for this destination.
    pub fn channel_name(&self) -> String {
        match self {
            Destination::Node(node_id) => node_channel(node_id),
            Destination::Broadcast => BROADCAST_CHANNEL.to_string(),
        }
    }
}

pub const BROADCAST_CHANNEL: &str = "calls:cluster:broadcast";

pub fn node_channel(node_id: &str) -> String {
    format!("calls:cluster:node:{node_id}")
}

/// Byte transport between nodes.
#[async_trait]
pub trait ClusterTransport: Send + Sync {
    /// Deliver `payload` to `destination`.
    async fn publish(&self, destination: &Destination, payload: Bytes) -> Result<(), CallsError>;

    /// Start receiving messages addressed to `node_id` or broadcast.
    async fn subscribe(&self, node_id: &str) -> Result<mpsc::Receiver<Bytes>, CallsError>;
}
