//! Channel call state.
//!
//! One record per channel, updated only through
//! [`CallStateStore::update`]. Backends:
//!
//! - [`RedisStateStore`] - shared across cluster nodes
//! - [`MemoryStateStore`] - single process

pub mod lua_scripts;
pub mod memory;
pub mod model;
pub mod redis;
pub mod store;

pub use memory::MemoryStateStore;
pub use model::{CallState, ChannelState, SessionBinding, UserState};
pub use self::redis::RedisStateStore;
pub use store::{CallStateStore, VersionedRecord, VersionedStore};
