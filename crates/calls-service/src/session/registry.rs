//! Node-local map from connection ID to session.
//!
//! A single reader/writer lock guards all indexes so lookups, inserts and
//! the reconnect hand-over are atomic with respect to each other.

use crate::errors::CallsError;
use crate::observability::metrics;
use crate::session::Session;

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Default)]
struct Indexes {
    /// Current connection ID -> session.
    by_connection: HashMap<String, Arc<Session>>,
    /// Original connection ID -> current connection ID.
    by_original: HashMap<String, String>,
    /// Superseded connection ID -> connection ID that replaced it.
    superseded: HashMap<String, String>,
}

impl Indexes {
    fn insert(&mut self, session: Arc<Session>) {
        self.by_original.insert(
            session.original_connection_id().to_string(),
            session.connection_id().to_string(),
        );
        self.by_connection
            .insert(session.connection_id().to_string(), session);
    }

    fn remove(&mut self, session: &Arc<Session>) -> bool {
        let conn_id = session.connection_id();
        let same = self
            .by_connection
            .get(conn_id)
            .is_some_and(|current| Arc::ptr_eq(current, session));
        if !same {
            return false;
        }

        self.by_connection.remove(conn_id);
        if self
            .by_original
            .get(session.original_connection_id())
            .is_some_and(|current| current == conn_id)
        {
            self.by_original.remove(session.original_connection_id());
        }
        self.superseded.retain(|_, replacement| replacement != conn_id);
        true
    }
}

/// Sessions hosted on this node.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    inner: RwLock<Indexes>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session under its connection and original IDs.
    pub async fn insert(&self, session: Arc<Session>) {
        let mut inner = self.inner.write().await;
        debug!(
            target: "calls.registry",
            connection_id = %session.connection_id(),
            original_connection_id = %session.original_connection_id(),
            relayed = session.is_relayed(),
            "Registering session"
        );
        inner.insert(session);
        metrics::set_active_sessions(inner.by_connection.len());
    }

    pub async fn get(&self, connection_id: &str) -> Option<Arc<Session>> {
        self.inner.read().await.by_connection.get(connection_id).cloned()
    }

    /// Session currently bound to `original_connection_id`.
    pub async fn get_by_original(&self, original_connection_id: &str) -> Option<Arc<Session>> {
        let inner = self.inner.read().await;
        inner
            .by_original
            .get(original_connection_id)
            .and_then(|conn_id| inner.by_connection.get(conn_id))
            .cloned()
    }

    /// Remove `session` if it is still the registered one for its
    /// connection ID. Returns whether anything was removed.
    pub async fn remove(&self, session: &Arc<Session>) -> bool {
        let mut inner = self.inner.write().await;
        let removed = inner.remove(session);
        if removed {
            debug!(
                target: "calls.registry",
                connection_id = %session.connection_id(),
                "Removed session"
            );
            metrics::set_active_sessions(inner.by_connection.len());
        }
        removed
    }

    /// Hand a connection over to `replacement` after a reconnect.
    ///
    /// The live session for `previous_connection_id` (or, failing that, for
    /// the replacement's own connection ID) gets its reconnect signal fired
    /// and is unregistered. Only one reconnect per connection can win; later
    /// attempts fail with `AlreadyReconnected`. Returns the superseded
    /// session, if one was found.
    pub async fn replace(
        &self,
        previous_connection_id: &str,
        replacement: Arc<Session>,
    ) -> Result<Option<Arc<Session>>, CallsError> {
        let mut inner = self.inner.write().await;

        if inner.superseded.contains_key(previous_connection_id) {
            return Err(CallsError::AlreadyReconnected(
                previous_connection_id.to_string(),
            ));
        }

        let previous = inner
            .by_connection
            .get(previous_connection_id)
            .or_else(|| inner.by_connection.get(replacement.connection_id()))
            .cloned();

        if let Some(previous) = &previous {
            if !previous.reconnect.fire() {
                return Err(CallsError::AlreadyReconnected(
                    previous.connection_id().to_string(),
                ));
            }
            inner.remove(previous);
            if previous.connection_id() != replacement.connection_id() {
                inner.superseded.insert(
                    previous.connection_id().to_string(),
                    replacement.connection_id().to_string(),
                );
            }
        }

        debug!(
            target: "calls.registry",
            previous_connection_id = %previous_connection_id,
            connection_id = %replacement.connection_id(),
            found_previous = previous.is_some(),
            "Reconnect hand-over"
        );
        inner.insert(replacement);
        metrics::set_active_sessions(inner.by_connection.len());
        Ok(previous)
    }

    /// Sessions bound to a channel.
    pub async fn channel_sessions(&self, channel_id: &str) -> Vec<Arc<Session>> {
        self.inner
            .read()
            .await
            .by_connection
            .values()
            .filter(|s| s.channel_id() == channel_id)
            .cloned()
            .collect()
    }

    /// All registered sessions.
    pub async fn snapshot(&self) -> Vec<Arc<Session>> {
        self.inner.read().await.by_connection.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.by_connection.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.by_connection.is_empty()
    }
}
