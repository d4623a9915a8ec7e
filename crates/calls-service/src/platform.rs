//! Host platform collaborators.
//!
//! The orchestrator runs inside a chat server that owns channel membership,
//! client broadcast, threads and analytics. Each concern is a trait so the
//! host can plug in its own implementation and tests can use mocks.

use crate::errors::CallsError;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Channel permission required for call participation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    CreatePost,
}

/// Channel kinds, as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelType {
    Open,
    Private,
    Direct,
    Group,
}

impl ChannelType {
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelType::Open => "O",
            ChannelType::Private => "P",
            ChannelType::Direct => "D",
            ChannelType::Group => "G",
        }
    }
}

/// Channel metadata needed to admit a join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: String,
    pub channel_type: ChannelType,
    pub archived: bool,
}

/// Who receives a broadcast event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BroadcastTarget {
    Channel(String),
    User(String),
}

/// Events published to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallEvent {
    Signal,
    Join,
    Error,
    UserConnected,
    UserDisconnected,
    UserMuted,
    UserUnmuted,
    UserVoiceOn,
    UserVoiceOff,
    UserScreenOn,
    UserScreenOff,
    CallStart,
    CallEnd,
    UserRaiseHand,
    UserUnraiseHand,
    UserReaction,
}

impl CallEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            CallEvent::Signal => "signal",
            CallEvent::Join => "join",
            CallEvent::Error => "error",
            CallEvent::UserConnected => "user_connected",
            CallEvent::UserDisconnected => "user_disconnected",
            CallEvent::UserMuted => "user_muted",
            CallEvent::UserUnmuted => "user_unmuted",
            CallEvent::UserVoiceOn => "user_voice_on",
            CallEvent::UserVoiceOff => "user_voice_off",
            CallEvent::UserScreenOn => "user_screen_on",
            CallEvent::UserScreenOff => "user_screen_off",
            CallEvent::CallStart => "call_start",
            CallEvent::CallEnd => "call_end",
            CallEvent::UserRaiseHand => "user_raise_hand",
            CallEvent::UserUnraiseHand => "user_unraise_hand",
            CallEvent::UserReaction => "user_reaction",
        }
    }
}

/// Analytics events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnalyticsEvent {
    CallStarted,
    UserJoined,
    UserLeft,
}

impl AnalyticsEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            AnalyticsEvent::CallStarted => "call_started",
            AnalyticsEvent::UserJoined => "user_joined",
            AnalyticsEvent::UserLeft => "user_left",
        }
    }
}

#[async_trait]
pub trait PermissionChecker: Send + Sync {
    async fn has_permission(&self, user_id: &str, channel_id: &str, permission: Permission)
        -> bool;
}

#[async_trait]
pub trait ChannelDirectory: Send + Sync {
    /// Look up a channel.
    ///
    /// # Errors
    ///
    /// `CallsError::ChannelUnavailable` when the channel cannot be fetched.
    async fn get_channel(&self, channel_id: &str) -> Result<ChannelInfo, CallsError>;
}

/// Client broadcast. Delivery is the host's concern; publishing never fails
/// from the caller's point of view.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: CallEvent, payload: Value, target: BroadcastTarget, reliable: bool);
}

#[async_trait]
pub trait ThreadCreator: Send + Sync {
    /// Create the thread announcing a call and return its ID.
    async fn start_call_thread(
        &self,
        user_id: &str,
        channel_id: &str,
        start_at: i64,
        title: &str,
    ) -> Result<String, CallsError>;
}

/// Analytics sink. Must not block.
pub trait AnalyticsSink: Send + Sync {
    fn track(&self, event: AnalyticsEvent, properties: HashMap<String, String>);
}

/// Cluster-wide coordination.
#[async_trait]
pub trait ClusterCoordinator: Send + Sync {
    /// Node currently elected to host media for the cluster, if any.
    async fn handler_node_id(&self) -> Result<Option<String>, CallsError>;
}

/// Coordinator for deployments without cluster-wide election.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCoordinator;

#[async_trait]
impl ClusterCoordinator for NoCoordinator {
    async fn handler_node_id(&self) -> Result<Option<String>, CallsError> {
        Ok(None)
    }
}

/// Analytics sink that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAnalytics;

impl AnalyticsSink for NoopAnalytics {
    fn track(&self, _event: AnalyticsEvent, _properties: HashMap<String, String>) {}
}

/// Host collaborators used by the lifecycle manager.
#[derive(Clone)]
pub struct Platform {
    pub permissions: Arc<dyn PermissionChecker>,
    pub channels: Arc<dyn ChannelDirectory>,
    pub events: Arc<dyn EventPublisher>,
    pub threads: Arc<dyn ThreadCreator>,
    pub analytics: Arc<dyn AnalyticsSink>,
    pub coordinator: Arc<dyn ClusterCoordinator>,
}
