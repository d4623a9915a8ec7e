//! Node bootstrap.
//!
//! Wires the Redis-backed state store and cluster transport into a
//! [`CallController`] and starts its background tasks. The host calls
//! [`CallsNode::start`] once per process and keeps the node for the
//! process lifetime.
//!
//! # Startup Flow
//!
//! 1. Connect the call state store to Redis
//! 2. Connect the cluster transport to Redis pub/sub
//! 3. Build the controller
//! 4. Subscribe to cluster traffic and media backend output

use crate::cluster::RedisClusterTransport;
use crate::config::Config;
use crate::errors::CallsError;
use crate::lifecycle::CallController;
use crate::platform::Platform;
use crate::rtc::MediaBackend;
use crate::state::{CallStateStore, RedisStateStore};

use secrecy::ExposeSecret;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Running calls node.
pub struct CallsNode {
    controller: Arc<CallController>,
    background: Vec<JoinHandle<()>>,
}

impl CallsNode {
    /// Connect to Redis and start the controller.
    ///
    /// # Errors
    ///
    /// Fails if Redis is unreachable or the cluster subscription cannot be
    /// established.
    pub async fn start(
        config: &Config,
        platform: Platform,
        media: MediaBackend,
    ) -> Result<Self, CallsError> {
        info!(
            target: "calls.node",
            node_id = %config.node_id,
            grace_period_seconds = config.reconnect_grace_period_seconds,
            max_participants = config.max_participants,
            remote_media = matches!(media, MediaBackend::Remote(_)),
            "Starting calls node"
        );

        let redis_url = config.redis_url.expose_secret();
        let backend = RedisStateStore::new(redis_url).await.map_err(|e| {
            error!(target: "calls.node", error = %e, "Failed to connect call state store");
            e
        })?;
        let transport = RedisClusterTransport::new(redis_url).await.map_err(|e| {
            error!(target: "calls.node", error = %e, "Failed to connect cluster transport");
            e
        })?;

        let settings = config.controller_settings();
        let state = CallStateStore::new(Arc::new(backend), settings.state_max_attempts);
        let cancel_token = CancellationToken::new();
        let controller = CallController::new(
            settings,
            state,
            Arc::new(transport),
            media,
            platform,
            cancel_token,
        );

        let background = controller.spawn_background_tasks().await?;
        info!(target: "calls.node", node_id = %config.node_id, "Calls node started");

        Ok(Self {
            controller,
            background,
        })
    }

    pub fn controller(&self) -> &Arc<CallController> {
        &self.controller
    }

    /// Leave all sessions and stop background tasks.
    pub async fn shutdown(self, timeout: Duration) {
        self.controller.shutdown(timeout).await;

        for handle in self.background {
            if let Err(e) = handle.await {
                warn!(target: "calls.node", error = %e, "Background task ended abnormally");
            }
        }
        info!(target: "calls.node", "Calls node stopped");
    }
}
