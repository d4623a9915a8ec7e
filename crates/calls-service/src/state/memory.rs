//! In-process [`VersionedStore`] for single-node deployments and tests.

use crate::errors::CallsError;
use crate::state::store::{VersionedRecord, VersionedStore};

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Versioned records held in a process-local map.
///
/// Deleted records stay behind as data-less tombstones so their version
/// keeps counting up if the key is written again.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    records: Mutex<HashMap<String, VersionedRecord>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (non-deleted) records.
    pub async fn len(&self) -> usize {
        self.records
            .lock()
            .await
            .values()
            .filter(|r| r.data.is_some())
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl VersionedStore for MemoryStateStore {
    async fn get(&self, key: &str) -> Result<VersionedRecord, CallsError> {
        Ok(self
            .records
            .lock()
            .await
            .get(key)
            .cloned()
            .unwrap_or_else(VersionedRecord::absent))
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: u64,
        data: Option<Vec<u8>>,
    ) -> Result<bool, CallsError> {
        let mut records = self.records.lock().await;
        let current = records.get(key).map_or(0, |r| r.version);
        if current != expected {
            return Ok(false);
        }

        records.insert(
            key.to_string(),
            VersionedRecord {
                version: current + 1,
                data,
            },
        );
        Ok(true)
    }
}
