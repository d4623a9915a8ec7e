//! Redis-backed [`VersionedStore`].
//!
//! # Key Patterns
//!
//! - `calls:channel:{id}:state` - Channel record (HASH with `version`, `data`).
//!   A deleted record keeps its `version` field as a tombstone.
//!
//! Writes go through [`lua_scripts::COMPARE_AND_SET`] so the version check
//! and the write happen atomically on the Redis side.

use crate::errors::CallsError;
use crate::state::lua_scripts;
use crate::state::store::{VersionedRecord, VersionedStore};

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Client, Script};
use tracing::{error, instrument, warn};

/// Versioned call state in Redis.
///
/// Cheaply cloneable; the multiplexed connection is shared across tasks.
#[derive(Clone)]
pub struct RedisStateStore {
    connection: MultiplexedConnection,
    cas_script: Script,
}

impl RedisStateStore {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns `CallsError::Redis` if the connection cannot be established.
    pub async fn new(redis_url: &str) -> Result<Self, CallsError> {
        let client = Client::open(redis_url).map_err(|e| {
            // redis_url may carry credentials, never log it
            error!(target: "calls.state", error = %e, "Failed to open Redis client");
            CallsError::Redis(format!("Failed to open Redis client: {e}"))
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                error!(target: "calls.state", error = %e, "Failed to connect to Redis");
                CallsError::Redis(format!("Failed to connect to Redis: {e}"))
            })?;

        Ok(Self::from_connection(connection))
    }

    /// Wrap an existing connection.
    pub fn from_connection(connection: MultiplexedConnection) -> Self {
        Self {
            connection,
            cas_script: Script::new(lua_scripts::COMPARE_AND_SET),
        }
    }
}

#[async_trait]
impl VersionedStore for RedisStateStore {
    #[instrument(skip_all, fields(key = %key))]
    async fn get(&self, key: &str) -> Result<VersionedRecord, CallsError> {
        let mut conn = self.connection.clone();

        let (version, data): (Option<u64>, Option<Vec<u8>>) = redis::cmd("HMGET")
            .arg(key)
            .arg("version")
            .arg("data")
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                warn!(target: "calls.state", error = %e, key = %key, "Failed to read call state");
                CallsError::Redis(format!("Failed to read call state: {e}"))
            })?;

        Ok(VersionedRecord {
            version: version.unwrap_or(0),
            data,
        })
    }

    #[instrument(skip_all, fields(key = %key, expected = expected))]
    async fn compare_and_set(
        &self,
        key: &str,
        expected: u64,
        data: Option<Vec<u8>>,
    ) -> Result<bool, CallsError> {
        let mut conn = self.connection.clone();
        let (op, payload) = match data {
            Some(data) => ("set", data),
            None => ("del", Vec::new()),
        };

        let result: i64 = self
            .cas_script
            .key(key)
            .arg(expected)
            .arg(op)
            .arg(payload)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                warn!(target: "calls.state", error = %e, key = %key, "Failed to write call state");
                CallsError::Redis(format!("Failed to write call state: {e}"))
            })?;

        match result {
            1 => Ok(true),
            0 => Ok(false),
            _ => {
                error!(target: "calls.state", key = %key, result = result, "Invalid compare-and-set arguments");
                Err(CallsError::Internal(format!(
                    "compare-and-set script returned {result}"
                )))
            }
        }
    }
}
