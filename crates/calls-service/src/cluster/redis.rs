//! Redis pub/sub cluster transport.
//!
//! # Channels
//!
//! - `calls:cluster:node:{id}` - messages for one node
//! - `calls:cluster:broadcast` - messages for every node

use crate::cluster::{node_channel, ClusterTransport, Destination, BROADCAST_CHANNEL};
use crate::errors::CallsError;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Inbound buffer between the pub/sub stream and the consumer.
const SUBSCRIPTION_BUFFER: usize = 1024;

/// [`ClusterTransport`] over Redis pub/sub.
#[derive(Clone)]
pub struct RedisClusterTransport {
    client: Client,
    connection: MultiplexedConnection,
}

impl RedisClusterTransport {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns `CallsError::Redis` if the connection cannot be established.
    pub async fn new(redis_url: &str) -> Result<Self, CallsError> {
        let client = Client::open(redis_url).map_err(|e| {
            // redis_url may carry credentials, never log it
            error!(target: "calls.cluster", error = %e, "Failed to open Redis client");
            CallsError::Redis(format!("Failed to open Redis client: {e}"))
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                error!(target: "calls.cluster", error = %e, "Failed to connect to Redis");
                CallsError::Redis(format!("Failed to connect to Redis: {e}"))
            })?;

        Ok(Self { client, connection })
    }
}

#[async_trait]
impl ClusterTransport for RedisClusterTransport {
    async fn publish(&self, destination: &Destination, payload: Bytes) -> Result<(), CallsError> {
        let mut conn = self.connection.clone();
        let channel = destination.channel_name();

        let receivers: i64 = conn
            .publish(&channel, payload.as_ref())
            .await
            .map_err(|e| CallsError::Redis(format!("Failed to publish to {channel}: {e}")))?;

        if receivers == 0 {
            debug!(target: "calls.cluster", channel = %channel, "No subscribers for cluster message");
        }
        Ok(())
    }

    async fn subscribe(&self, node_id: &str) -> Result<mpsc::Receiver<Bytes>, CallsError> {
        let mut pubsub = self.client.get_async_pubsub().await.map_err(|e| {
            error!(target: "calls.cluster", error = %e, "Failed to open pub/sub connection");
            CallsError::Redis(format!("Failed to open pub/sub connection: {e}"))
        })?;

        let own_channel = node_channel(node_id);
        for channel in [own_channel.as_str(), BROADCAST_CHANNEL] {
            pubsub
                .subscribe(channel)
                .await
                .map_err(|e| CallsError::Redis(format!("Failed to subscribe to {channel}: {e}")))?;
        }
        info!(
            target: "calls.cluster",
            node_id = %node_id,
            channel = %own_channel,
            "Subscribed to cluster channels"
        );

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        tokio::spawn(async move {
            let mut stream = pubsub.into_on_message();
            loop {
                tokio::select! {
                    () = tx.closed() => break,
                    msg = stream.next() => {
                        let Some(msg) = msg else {
                            warn!(target: "calls.cluster", "Cluster subscription stream ended");
                            break;
                        };
                        let payload = Bytes::copy_from_slice(msg.get_payload_bytes());
                        if tx.send(payload).await.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!(target: "calls.cluster", "Cluster subscription task exiting");
        });

        Ok(rx)
    }
}
