//! Test fixtures.
//!
//! - Client request builders matching what the host forwards from websockets,
//!   including packed SDP
//! - [`TestNode`], a controller wired to in-memory state, a mock platform and
//!   a mock media backend
//!
//! # Example
//!
//! ```rust,ignore
//! use calls_test_utils::fixtures::*;
//!
//! let bus = Arc::new(MemoryClusterBus::new());
//! let node_a = TestNode::builder("node-a").bus(Arc::clone(&bus)).build().await;
//! let node_b = TestNode::builder("node-b")
//!     .bus(Arc::clone(&bus))
//!     .store(node_a.store.clone())
//!     .build()
//!     .await;
//! ```

use crate::cluster_bus::MemoryClusterBus;
use crate::mock_media::{MockMediaCoordinator, MockMediaEngine};
use crate::mock_platform::MockPlatform;
use calls_service::config::{ControllerSettings, DEFAULT_ACTION_PREFIX};
use calls_service::rtc::MediaBackend;
use calls_service::state::{CallStateStore, ChannelState, MemoryStateStore, VersionedStore};
use calls_service::{CallController, WebSocketRequest};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

fn action(msg_type: &str) -> String {
    format!("{DEFAULT_ACTION_PREFIX}{msg_type}")
}

pub fn join_request(channel_id: &str) -> WebSocketRequest {
    WebSocketRequest::new(action("join")).with("channelID", channel_id)
}

pub fn join_request_with_title(channel_id: &str, title: &str) -> WebSocketRequest {
    join_request(channel_id).with("title", title)
}

pub fn reconnect_request(
    channel_id: &str,
    original_connection_id: &str,
    previous_connection_id: &str,
) -> WebSocketRequest {
    WebSocketRequest::new(action("reconnect"))
        .with("channelID", channel_id)
        .with("originalConnID", original_connection_id)
        .with("prevConnID", previous_connection_id)
}

pub fn leave_request() -> WebSocketRequest {
    WebSocketRequest::new(action("leave"))
}

pub fn sdp_request(sdp: &str) -> WebSocketRequest {
    WebSocketRequest::new(action("sdp")).with("data", sdp)
}

/// SDP packed the way the web client sends it: zlib-compressed octets.
pub fn packed_sdp_request(sdp: &str) -> WebSocketRequest {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(sdp.as_bytes()).unwrap();
    WebSocketRequest::new(action("sdp")).with("data", encoder.finish().unwrap())
}

pub fn ice_request(candidate: &str) -> WebSocketRequest {
    WebSocketRequest::new(action("ice")).with("data", candidate)
}

pub fn screen_on_request(stream_id: &str) -> WebSocketRequest {
    let data = serde_json::json!({ "screenStreamID": stream_id }).to_string();
    WebSocketRequest::new(action("screen_on")).with("data", data)
}

pub fn react_request(emoji: &str) -> WebSocketRequest {
    let data = serde_json::json!({ "emoji": emoji }).to_string();
    WebSocketRequest::new(action("react")).with("data", data)
}

/// Request for a message type that carries no payload (`mute`,
/// `screen_off`, `raise_hand`, ...).
pub fn simple_request(msg_type: &str) -> WebSocketRequest {
    WebSocketRequest::new(action(msg_type))
}

/// Controller wired to in-memory collaborators.
pub struct TestNode {
    pub controller: Arc<CallController>,
    pub platform: Arc<MockPlatform>,
    pub engine: Option<Arc<MockMediaEngine>>,
    pub coordinator: Option<Arc<MockMediaCoordinator>>,
    pub bus: Arc<MemoryClusterBus>,
    pub store: Arc<dyn VersionedStore>,
    pub cancel_token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl TestNode {
    pub fn builder(node_id: &str) -> TestNodeBuilder {
        TestNodeBuilder::new(node_id)
    }

    /// Forward a websocket request from `connection_id`.
    pub async fn send(&self, connection_id: &str, user_id: &str, request: WebSocketRequest) {
        self.controller
            .handle_websocket_message(connection_id, user_id, request)
            .await;
    }

    /// Report the websocket for `connection_id` closed.
    pub async fn disconnect(&self, connection_id: &str) {
        self.controller.handle_websocket_disconnect(connection_id).await;
    }

    pub async fn channel_state(&self, channel_id: &str) -> Option<ChannelState> {
        self.controller.state().get(channel_id).await.unwrap()
    }

    /// Whether `connection_id` is in the registry.
    pub async fn has_session(&self, connection_id: &str) -> bool {
        self.controller.registry().get(connection_id).await.is_some()
    }

    pub fn engine(&self) -> &Arc<MockMediaEngine> {
        self.engine.as_ref().unwrap()
    }

    pub fn coordinator(&self) -> &Arc<MockMediaCoordinator> {
        self.coordinator.as_ref().unwrap()
    }

    /// Shut down and wait for background tasks.
    pub async fn shutdown(self, timeout: Duration) {
        self.controller.shutdown(timeout).await;
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

/// Builder for [`TestNode`].
pub struct TestNodeBuilder {
    settings: ControllerSettings,
    platform: Option<Arc<MockPlatform>>,
    bus: Option<Arc<MemoryClusterBus>>,
    store: Option<Arc<dyn VersionedStore>>,
    coordinator: Option<Arc<MockMediaCoordinator>>,
}

impl TestNodeBuilder {
    pub fn new(node_id: &str) -> Self {
        Self {
            settings: ControllerSettings::new(node_id),
            platform: None,
            bus: None,
            store: None,
            coordinator: None,
        }
    }

    #[must_use]
    pub fn grace_period(mut self, grace_period: Duration) -> Self {
        self.settings.reconnect_grace_period = grace_period;
        self
    }

    #[must_use]
    pub fn rate_limit(mut self, per_second: u32, burst: u32) -> Self {
        self.settings.rate_limit_per_second = per_second;
        self.settings.rate_limit_burst = burst;
        self
    }

    #[must_use]
    pub fn session_queue_capacity(mut self, capacity: usize) -> Self {
        self.settings.session_queue_capacity = capacity;
        self
    }

    #[must_use]
    pub fn max_participants(mut self, max: u32) -> Self {
        self.settings.max_participants = max;
        self
    }

    #[must_use]
    pub fn platform(mut self, platform: Arc<MockPlatform>) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Join a cluster shared with other test nodes.
    #[must_use]
    pub fn bus(mut self, bus: Arc<MemoryClusterBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Share call state with other test nodes.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn VersionedStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use a remote media coordination service instead of a local engine.
    #[must_use]
    pub fn remote_media(mut self, coordinator: Arc<MockMediaCoordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    pub async fn build(self) -> TestNode {
        let platform = self.platform.unwrap_or_else(|| Arc::new(MockPlatform::new()));
        let bus = self.bus.unwrap_or_else(|| Arc::new(MemoryClusterBus::new()));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStateStore::new()) as Arc<dyn VersionedStore>);

        let (media, engine) = match &self.coordinator {
            Some(coordinator) => (
                MediaBackend::Remote(Arc::clone(coordinator) as _),
                None,
            ),
            None => {
                let engine = Arc::new(MockMediaEngine::new());
                (
                    MediaBackend::Local(Arc::clone(&engine) as _),
                    Some(engine),
                )
            }
        };

        let cancel_token = CancellationToken::new();
        let state = CallStateStore::new(Arc::clone(&store), self.settings.state_max_attempts);
        let controller = CallController::new(
            self.settings,
            state,
            Arc::clone(&bus) as _,
            media,
            platform.platform(),
            cancel_token.clone(),
        );
        let handles = controller.spawn_background_tasks().await.unwrap();

        TestNode {
            controller,
            platform,
            engine,
            coordinator: self.coordinator,
            bus,
            store,
            cancel_token,
            handles,
        }
    }
}
