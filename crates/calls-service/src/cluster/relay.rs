//! Outbound relay with one queue and worker per destination.

use crate::cluster::{ClusterMessage, ClusterTransport, Destination};
use crate::errors::CallsError;
use crate::observability::metrics;

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Fire-and-forget sender of [`ClusterMessage`]s.
pub struct ClusterRelay {
    node_id: String,
    transport: Arc<dyn ClusterTransport>,
    queue_capacity: usize,
    queues: Mutex<HashMap<Destination, mpsc::Sender<Bytes>>>,
    cancel_token: CancellationToken,
}

impl ClusterRelay {
    pub fn new(
        node_id: &str,
        transport: Arc<dyn ClusterTransport>,
        queue_capacity: usize,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            node_id: node_id.to_string(),
            transport,
            queue_capacity: queue_capacity.max(1),
            queues: Mutex::new(HashMap::new()),
            cancel_token,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn transport(&self) -> &Arc<dyn ClusterTransport> {
        &self.transport
    }

    /// Enqueue `msg` for `destination` without waiting for delivery.
    ///
    /// # Errors
    ///
    /// `CallsError::RelayFailure` when the destination queue is full or the
    /// relay is shut down. Delivery errors after enqueue are only logged.
    pub fn send(&self, msg: &ClusterMessage, destination: Destination) -> Result<(), CallsError> {
        if self.cancel_token.is_cancelled() {
            return Err(CallsError::RelayFailure("relay is shut down".to_string()));
        }

        let payload = msg.encode()?;
        let kind = msg.msg_type.as_str();
        let sender = self.queue_for(&destination);

        match sender.try_send(payload) {
            Ok(()) => {
                metrics::record_relay_message(kind, "queued");
                debug!(
                    target: "calls.cluster",
                    msg_type = kind,
                    destination = ?destination,
                    connection_id = %msg.connection_id,
                    "Queued cluster message"
                );
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                metrics::record_relay_message(kind, "dropped");
                Err(CallsError::RelayFailure(format!(
                    "queue for {destination:?} is full"
                )))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.lock_queues().remove(&destination);
                metrics::record_relay_message(kind, "dropped");
                Err(CallsError::RelayFailure(format!(
                    "queue for {destination:?} is closed"
                )))
            }
        }
    }

    fn lock_queues(&self) -> std::sync::MutexGuard<'_, HashMap<Destination, mpsc::Sender<Bytes>>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn queue_for(&self, destination: &Destination) -> mpsc::Sender<Bytes> {
        let mut queues = self.lock_queues();
        if let Some(sender) = queues.get(destination) {
            if !sender.is_closed() {
                return sender.clone();
            }
        }

        let (tx, rx) = mpsc::channel(self.queue_capacity);
        tokio::spawn(run_worker(
            destination.clone(),
            Arc::clone(&self.transport),
            rx,
            self.cancel_token.child_token(),
        ));
        queues.insert(destination.clone(), tx.clone());
        tx
    }
}

async fn run_worker(
    destination: Destination,
    transport: Arc<dyn ClusterTransport>,
    mut rx: mpsc::Receiver<Bytes>,
    cancel_token: CancellationToken,
) {
    debug!(target: "calls.cluster", destination = ?destination, "Relay worker started");

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!(
                    target: "calls.cluster",
                    destination = ?destination,
                    pending = rx.len(),
                    "Relay worker shutting down"
                );
                break;
            }
            payload = rx.recv() => {
                let Some(payload) = payload else { break };
                if let Err(e) = transport.publish(&destination, payload).await {
                    metrics::record_relay_delivery(false);
                    warn!(
                        target: "calls.cluster",
                        destination = ?destination,
                        error = %e,
                        "Failed to deliver cluster message"
                    );
                } else {
                    metrics::record_relay_delivery(true);
                }
            }
        }
    }
}
