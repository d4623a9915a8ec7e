//! In-process cluster transport.
//!
//! Several controllers sharing one [`MemoryClusterBus`] behave like nodes on
//! a Redis pub/sub cluster: node-addressed payloads reach one subscriber,
//! broadcasts reach all of them (the sender included).

use async_trait::async_trait;
use bytes::Bytes;
use calls_service::cluster::{ClusterMessage, ClusterTransport, Destination};
use calls_service::errors::CallsError;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;

const SUBSCRIBER_CAPACITY: usize = 1024;

/// Shared in-memory pub/sub bus.
#[derive(Debug, Default)]
pub struct MemoryClusterBus {
    subscribers: Mutex<HashMap<String, mpsc::Sender<Bytes>>>,
    published: Mutex<Vec<(Destination, ClusterMessage)>>,
}

impl MemoryClusterBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything published so far, decoded, in publish order.
    pub fn published(&self) -> Vec<(Destination, ClusterMessage)> {
        self.published.lock().unwrap().clone()
    }

    /// Published messages addressed to `destination`.
    pub fn published_to(&self, destination: &Destination) -> Vec<ClusterMessage> {
        self.published()
            .into_iter()
            .filter(|(d, _)| d == destination)
            .map(|(_, msg)| msg)
            .collect()
    }
}

#[async_trait]
impl ClusterTransport for MemoryClusterBus {
    async fn publish(&self, destination: &Destination, payload: Bytes) -> Result<(), CallsError> {
        let msg = ClusterMessage::decode(&payload)?;
        self.published
            .lock()
            .unwrap()
            .push((destination.clone(), msg));

        let targets: Vec<mpsc::Sender<Bytes>> = {
            let subscribers = self.subscribers.lock().unwrap();
            match destination {
                Destination::Node(node_id) => subscribers.get(node_id).cloned().into_iter().collect(),
                Destination::Broadcast => subscribers.values().cloned().collect(),
            }
        };

        for target in targets {
            // a node that went away is like an unsubscribed channel
            let _ = target.send(payload.clone()).await;
        }
        Ok(())
    }

    async fn subscribe(&self, node_id: &str) -> Result<mpsc::Receiver<Bytes>, CallsError> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        self.subscribers
            .lock()
            .unwrap()
            .insert(node_id.to_string(), tx);
        Ok(rx)
    }
}
