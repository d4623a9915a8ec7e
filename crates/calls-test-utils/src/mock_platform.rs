//! Recording host platform.
//!
//! [`MockPlatform`] implements every host collaborator trait. Permission and
//! channel lookups are configurable; broadcasts, thread creation and analytics
//! are recorded for assertions.
//!
//! # Example
//!
//! ```rust,ignore
//! use calls_test_utils::MockPlatform;
//!
//! let platform = MockPlatform::new()
//!     .with_denied_user("mallory")
//!     .with_archived_channel("old-chan");
//!
//! let controller_platform = platform.platform();
//! ```

use async_trait::async_trait;
use calls_service::errors::CallsError;
use calls_service::platform::{
    AnalyticsEvent, AnalyticsSink, BroadcastTarget, CallEvent, ChannelDirectory, ChannelInfo,
    ChannelType, ClusterCoordinator, EventPublisher, Permission, PermissionChecker, Platform,
    ThreadCreator,
};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// One recorded broadcast.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedEvent {
    pub event: CallEvent,
    pub payload: Value,
    pub target: BroadcastTarget,
    pub reliable: bool,
}

/// Mock host platform.
#[derive(Debug, Default)]
pub struct MockPlatform {
    denied_users: HashSet<String>,
    archived_channels: HashSet<String>,
    missing_channels: HashSet<String>,
    channel_type: Option<ChannelType>,
    fail_threads: bool,
    handler_node: Mutex<Option<String>>,
    events: Mutex<Vec<PublishedEvent>>,
    analytics: Mutex<Vec<(AnalyticsEvent, HashMap<String, String>)>>,
    threads: Mutex<Vec<(String, String)>>,
}

impl MockPlatform {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deny the post permission to `user_id` everywhere.
    #[must_use]
    pub fn with_denied_user(mut self, user_id: &str) -> Self {
        self.denied_users.insert(user_id.to_string());
        self
    }

    #[must_use]
    pub fn with_archived_channel(mut self, channel_id: &str) -> Self {
        self.archived_channels.insert(channel_id.to_string());
        self
    }

    /// Make channel lookups for `channel_id` fail.
    #[must_use]
    pub fn with_missing_channel(mut self, channel_id: &str) -> Self {
        self.missing_channels.insert(channel_id.to_string());
        self
    }

    #[must_use]
    pub fn with_channel_type(mut self, channel_type: ChannelType) -> Self {
        self.channel_type = Some(channel_type);
        self
    }

    /// Make call thread creation fail.
    #[must_use]
    pub fn with_failing_threads(mut self) -> Self {
        self.fail_threads = true;
        self
    }

    #[must_use]
    pub fn with_handler_node(self, node_id: &str) -> Self {
        self.set_handler_node(Some(node_id));
        self
    }

    /// Change the cluster-elected media node.
    pub fn set_handler_node(&self, node_id: Option<&str>) {
        *self.handler_node.lock().unwrap() = node_id.map(str::to_string);
    }

    /// Collaborators for a controller, all backed by this mock.
    pub fn platform(self: &Arc<Self>) -> Platform {
        Platform {
            permissions: Arc::clone(self) as Arc<dyn PermissionChecker>,
            channels: Arc::clone(self) as Arc<dyn ChannelDirectory>,
            events: Arc::clone(self) as Arc<dyn EventPublisher>,
            threads: Arc::clone(self) as Arc<dyn ThreadCreator>,
            analytics: Arc::clone(self) as Arc<dyn AnalyticsSink>,
            coordinator: Arc::clone(self) as Arc<dyn ClusterCoordinator>,
        }
    }

    /// All broadcasts in publish order.
    pub fn events(&self) -> Vec<PublishedEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Broadcasts of one kind in publish order.
    pub fn events_of(&self, event: CallEvent) -> Vec<PublishedEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.event == event)
            .collect()
    }

    pub fn count(&self, event: CallEvent) -> usize {
        self.events_of(event).len()
    }

    /// Tracked analytics events in order.
    pub fn analytics(&self) -> Vec<(AnalyticsEvent, HashMap<String, String>)> {
        self.analytics.lock().unwrap().clone()
    }

    pub fn analytics_count(&self, event: AnalyticsEvent) -> usize {
        self.analytics().iter().filter(|(e, _)| *e == event).count()
    }

    /// `(user_id, channel_id)` of every call thread started.
    pub fn threads(&self) -> Vec<(String, String)> {
        self.threads.lock().unwrap().clone()
    }

    pub fn clear_events(&self) {
        self.events.lock().unwrap().clear();
    }
}

#[async_trait]
impl PermissionChecker for MockPlatform {
    async fn has_permission(&self, user_id: &str, _channel_id: &str, _permission: Permission) -> bool {
        !self.denied_users.contains(user_id)
    }
}

#[async_trait]
impl ChannelDirectory for MockPlatform {
    async fn get_channel(&self, channel_id: &str) -> Result<ChannelInfo, CallsError> {
        if self.missing_channels.contains(channel_id) {
            return Err(CallsError::ChannelUnavailable(format!(
                "channel {channel_id} not found"
            )));
        }
        Ok(ChannelInfo {
            id: channel_id.to_string(),
            channel_type: self.channel_type.unwrap_or(ChannelType::Open),
            archived: self.archived_channels.contains(channel_id),
        })
    }
}

#[async_trait]
impl EventPublisher for MockPlatform {
    async fn publish(&self, event: CallEvent, payload: Value, target: BroadcastTarget, reliable: bool) {
        self.events.lock().unwrap().push(PublishedEvent {
            event,
            payload,
            target,
            reliable,
        });
    }
}

#[async_trait]
impl ThreadCreator for MockPlatform {
    async fn start_call_thread(
        &self,
        user_id: &str,
        channel_id: &str,
        start_at: i64,
        _title: &str,
    ) -> Result<String, CallsError> {
        if self.fail_threads {
            return Err(CallsError::Internal("thread creation failed".to_string()));
        }
        self.threads
            .lock()
            .unwrap()
            .push((user_id.to_string(), channel_id.to_string()));
        Ok(format!("thread-{channel_id}-{start_at}"))
    }
}

impl AnalyticsSink for MockPlatform {
    fn track(&self, event: AnalyticsEvent, properties: HashMap<String, String>) {
        self.analytics.lock().unwrap().push((event, properties));
    }
}

#[async_trait]
impl ClusterCoordinator for MockPlatform {
    async fn handler_node_id(&self) -> Result<Option<String>, CallsError> {
        Ok(self.handler_node.lock().unwrap().clone())
    }
}
