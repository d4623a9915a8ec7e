//! Calls Service Library
//!
//! Call session orchestration for a chat server that hosts voice/video calls
//! in its channels. The library is embedded in the host process, which
//! forwards client websocket traffic into it and supplies the platform
//! collaborators (permissions, channels, broadcast, threads, analytics).
//!
//! - Admits, tracks and tears down per-connection call sessions
//! - Keeps per-channel call state consistent through compare-and-swap
//! - Tolerates brief client disconnects with a reconnect grace period
//! - Routes media signaling to a local engine, a remote coordination
//!   service, or the cluster node that owns the call's media
//!
//! # Architecture
//!
//! ```text
//! CallsNode
//! └── CallController (one per node)
//!     ├── SessionRegistry     live sessions by connection
//!     ├── CallStateStore      CAS over Redis hashes
//!     ├── ClusterRelay        per-destination ordered pub/sub
//!     ├── RtcDispatcher       local engine or remote coordinator
//!     └── per-connection join/reconnect tasks
//!         └── read loop (rate limited, bounded queue)
//! ```
//!
//! # Modules
//!
//! - [`lifecycle`] - Join, reconnect, leave and message handling
//! - [`state`] - Durable call state and its CAS store
//! - [`session`] - Session handles and the registry
//! - [`cluster`] - Inter-node relay
//! - [`rtc`] - Media backend dispatch
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types with client-safe messages

pub mod authority;
pub mod client;
pub mod cluster;
pub mod config;
pub mod errors;
pub mod lifecycle;
pub mod node;
pub mod observability;
pub mod platform;
pub mod ratelimit;
pub mod rtc;
pub mod session;
pub mod state;

pub use client::WebSocketRequest;
pub use config::{Config, ControllerSettings};
pub use errors::CallsError;
pub use lifecycle::CallController;
pub use node::CallsNode;
