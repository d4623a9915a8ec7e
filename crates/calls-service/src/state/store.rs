//! Optimistic-concurrency updates over a versioned record store.
//!
//! [`CallStateStore::update`] is the only mutation path for call state. It
//! reads the record and its version, runs the mutator, and writes back only
//! if the version is unchanged. A conflicting write restarts the whole
//! read-mutate-write cycle. Mutators must not touch external systems since
//! they may run several times.

use crate::errors::CallsError;
use crate::observability::metrics;
use crate::state::model::ChannelState;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

/// Record bytes plus the version they were read at.
///
/// Versions never repeat for a key: every write bumps it, deletes included,
/// so `data: None` with a nonzero version is a deleted record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedRecord {
    pub version: u64,
    pub data: Option<Vec<u8>>,
}

impl VersionedRecord {
    /// A key that was never written.
    pub fn absent() -> Self {
        Self {
            version: 0,
            data: None,
        }
    }
}

/// Durable key-value store with optimistic versioning.
#[async_trait]
pub trait VersionedStore: Send + Sync {
    /// Read a record. Missing keys read as [`VersionedRecord::absent`].
    async fn get(&self, key: &str) -> Result<VersionedRecord, CallsError>;

    /// Write `data` (or delete when `None`) only if the stored version still
    /// equals `expected`. A successful write, delete included, leaves the
    /// key at `expected + 1`.
    ///
    /// Returns `false` on a version mismatch.
    async fn compare_and_set(
        &self,
        key: &str,
        expected: u64,
        data: Option<Vec<u8>>,
    ) -> Result<bool, CallsError>;
}

/// Typed call state access on top of a [`VersionedStore`].
#[derive(Clone)]
pub struct CallStateStore {
    backend: Arc<dyn VersionedStore>,
    max_attempts: u32,
}

pub(crate) fn state_key(channel_id: &str) -> String {
    format!("calls:channel:{channel_id}:state")
}

impl CallStateStore {
    pub fn new(backend: Arc<dyn VersionedStore>, max_attempts: u32) -> Self {
        Self {
            backend,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Current state for a channel.
    #[instrument(skip_all, fields(channel_id = %channel_id))]
    pub async fn get(&self, channel_id: &str) -> Result<Option<ChannelState>, CallsError> {
        let record = self.backend.get(&state_key(channel_id)).await?;
        record.data.as_deref().map(decode).transpose()
    }

    /// Atomically apply `mutator` to the channel's state.
    ///
    /// The mutator receives the current state (`None` when absent) and
    /// returns the new state, `None` to delete the record, or an error that
    /// aborts the update with no effect. Returns the committed state.
    #[instrument(skip_all, fields(channel_id = %channel_id))]
    pub async fn update<F>(
        &self,
        channel_id: &str,
        mut mutator: F,
    ) -> Result<Option<ChannelState>, CallsError>
    where
        F: FnMut(Option<ChannelState>) -> Result<Option<ChannelState>, CallsError> + Send,
    {
        let key = state_key(channel_id);
        let start = Instant::now();

        for attempt in 1..=self.max_attempts {
            let record = self.backend.get(&key).await?;
            let current = record.data.as_deref().map(decode).transpose()?;

            let next = mutator(current.clone())?;
            if next == current {
                // nothing to write
                return Ok(next);
            }

            let payload = next.as_ref().map(serde_json::to_vec).transpose()?;
            if self
                .backend
                .compare_and_set(&key, record.version, payload)
                .await?
            {
                metrics::record_state_update(attempt, start.elapsed());
                debug!(
                    target: "calls.state",
                    channel_id = %channel_id,
                    attempt = attempt,
                    deleted = next.is_none(),
                    "Committed call state update"
                );
                return Ok(next);
            }

            metrics::record_state_conflict();
            debug!(
                target: "calls.state",
                channel_id = %channel_id,
                attempt = attempt,
                "Call state changed concurrently, retrying"
            );
            if attempt > 1 {
                tokio::time::sleep(Duration::from_millis(u64::from(attempt.min(10)))).await;
            }
        }

        warn!(
            target: "calls.state",
            channel_id = %channel_id,
            attempts = self.max_attempts,
            "Call state update retries exhausted"
        );
        Err(CallsError::StateConflict(format!(
            "update of channel {channel_id} gave up after {} attempts",
            self.max_attempts
        )))
    }
}

fn decode(data: &[u8]) -> Result<ChannelState, CallsError> {
    serde_json::from_slice(data).map_err(|e| {
        CallsError::Serialization(format!("failed to decode channel state: {e}"))
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::state::memory::MemoryStateStore;
    use crate::state::model::CallState;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn store() -> CallStateStore {
        CallStateStore::new(Arc::new(MemoryStateStore::new()), 8)
    }

    /// Backend that reports a version conflict a fixed number of times.
    struct Flaky {
        inner: MemoryStateStore,
        conflicts_left: AtomicU32,
    }

    #[async_trait]
    impl VersionedStore for Flaky {
        async fn get(&self, key: &str) -> Result<VersionedRecord, CallsError> {
            self.inner.get(key).await
        }

        async fn compare_and_set(
            &self,
            key: &str,
            expected: u64,
            data: Option<Vec<u8>>,
        ) -> Result<bool, CallsError> {
            if self.conflicts_left.load(Ordering::SeqCst) > 0 {
                self.conflicts_left.fetch_sub(1, Ordering::SeqCst);
                return Ok(false);
            }
            self.inner.compare_and_set(key, expected, data).await
        }
    }

    /// Backend where, right after the first read, the call ends and a new
    /// one starts on the same channel.
    struct CallReplacedAfterRead {
        inner: MemoryStateStore,
        replaced: AtomicU32,
    }

    fn channel_with_call(call_id: &str, user_id: &str) -> ChannelState {
        let mut call = CallState::new(user_id, 0);
        call.id = call_id.to_string();
        call.add_session(user_id, &format!("conn-{user_id}"));
        ChannelState {
            node_id: "node-a".to_string(),
            call: Some(call),
        }
    }

    #[async_trait]
    impl VersionedStore for CallReplacedAfterRead {
        async fn get(&self, key: &str) -> Result<VersionedRecord, CallsError> {
            let record = self.inner.get(key).await?;
            if self.replaced.fetch_add(1, Ordering::SeqCst) == 0 {
                assert!(self.inner.compare_and_set(key, record.version, None).await?);
                let next = serde_json::to_vec(&channel_with_call("call-2", "bob"))?;
                assert!(
                    self.inner
                        .compare_and_set(key, record.version + 1, Some(next))
                        .await?
                );
            }
            Ok(record)
        }

        async fn compare_and_set(
            &self,
            key: &str,
            expected: u64,
            data: Option<Vec<u8>>,
        ) -> Result<bool, CallsError> {
            self.inner.compare_and_set(key, expected, data).await
        }
    }

    #[tokio::test]
    async fn test_update_creates_and_reads_back() {
        let store = store();
        let committed = store
            .update("chan-1", |state| {
                assert!(state.is_none());
                let mut call = CallState::new("alice", 1);
                call.add_session("alice", "conn-1");
                Ok(Some(ChannelState {
                    node_id: "node-a".to_string(),
                    call: Some(call),
                }))
            })
            .await
            .unwrap()
            .unwrap();

        let read = store.get("chan-1").await.unwrap().unwrap();
        assert_eq!(read, committed);
        assert_eq!(read.node_id, "node-a");
    }

    #[tokio::test]
    async fn test_mutator_error_leaves_state_untouched() {
        let store = store();
        store
            .update("chan-1", |_| Ok(Some(ChannelState::default())))
            .await
            .unwrap();

        let result = store
            .update("chan-1", |_| {
                Err(CallsError::ScreenShareConflict("taken".to_string()))
            })
            .await;

        assert!(matches!(result, Err(CallsError::ScreenShareConflict(_))));
        assert_eq!(
            store.get("chan-1").await.unwrap(),
            Some(ChannelState::default())
        );
    }

    #[tokio::test]
    async fn test_returning_none_deletes_record() {
        let store = store();
        store
            .update("chan-1", |_| Ok(Some(ChannelState::default())))
            .await
            .unwrap();
        store.update("chan-1", |_| Ok(None)).await.unwrap();

        assert!(store.get("chan-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_retries_after_conflict() {
        let backend = Arc::new(Flaky {
            inner: MemoryStateStore::new(),
            conflicts_left: AtomicU32::new(3),
        });
        let store = CallStateStore::new(backend, 8);
        let mut runs = 0;

        store
            .update("chan-1", |_| {
                runs += 1;
                Ok(Some(ChannelState::default()))
            })
            .await
            .unwrap();

        assert_eq!(runs, 4);
        assert!(store.get("chan-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_stale_read_of_ended_call_does_not_overwrite_new_call() {
        let inner = MemoryStateStore::new();
        let first = serde_json::to_vec(&channel_with_call("call-1", "alice")).unwrap();
        inner
            .compare_and_set(&state_key("chan-1"), 0, Some(first))
            .await
            .unwrap();
        let store = CallStateStore::new(
            Arc::new(CallReplacedAfterRead {
                inner,
                replaced: AtomicU32::new(0),
            }),
            8,
        );

        let mut seen = Vec::new();
        let committed = store
            .update("chan-1", |state| {
                let mut state = state.unwrap();
                let call = state.call.as_mut().unwrap();
                seen.push(call.id.clone());
                call.set_unmuted("alice", true);
                Ok(Some(state))
            })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(seen, vec!["call-1".to_string(), "call-2".to_string()]);
        let call = committed.call.unwrap();
        assert_eq!(call.id, "call-2");
        assert!(call.users.contains_key("bob"));
        assert!(!call.users.contains_key("alice"));
        let stored = store.get("chan-1").await.unwrap().unwrap();
        assert_eq!(stored.call.unwrap().id, "call-2");
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail() {
        let backend = Arc::new(Flaky {
            inner: MemoryStateStore::new(),
            conflicts_left: AtomicU32::new(100),
        });
        let store = CallStateStore::new(backend, 3);

        let result = store
            .update("chan-1", |_| Ok(Some(ChannelState::default())))
            .await;

        assert!(matches!(result, Err(CallsError::StateConflict(_))));
        assert!(store.get("chan-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let store = store();
        store
            .update("chan-1", |_| {
                Ok(Some(ChannelState {
                    node_id: String::new(),
                    call: Some(CallState::new("owner", 0)),
                }))
            })
            .await
            .unwrap();

        let mut tasks = Vec::new();
        for i in 0..20 {
            let store = CallStateStore::new(Arc::clone(&store.backend), 64);
            tasks.push(tokio::spawn(async move {
                store
                    .update("chan-1", move |state| {
                        let mut state = state.unwrap();
                        if let Some(call) = state.call.as_mut() {
                            call.add_session(&format!("user-{i}"), &format!("conn-{i}"));
                        }
                        Ok(Some(state))
                    })
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let call = store.get("chan-1").await.unwrap().unwrap().call.unwrap();
        assert_eq!(call.users.len(), 20);
        assert_eq!(call.sessions.len(), 20);
    }
}
