//! # Calls Test Utilities
//!
//! Shared test utilities for the calls service.
//!
//! This crate provides mock implementations and test fixtures for
//! isolated lifecycle testing without requiring Redis or a media server.
//!
//! ## Modules
//!
//! - `mock_platform` - Recording host platform (permissions, channels, broadcast)
//! - `mock_media` - Recording media engine and remote coordinator
//! - `cluster_bus` - In-process cluster transport for multi-node tests
//! - `fixtures` - Client request builders and a wired test node
//! - `eventual` - Polling assertions for asynchronous effects
//!
//! ## Usage
//!
//! ```rust,ignore
//! use calls_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let node = TestNode::builder("node-a").build().await;
//!
//!     node.send("conn-1", "alice", join_request("chan-1")).await;
//!
//!     assert_eventually(Duration::from_secs(1), || async {
//!         node.platform.count(CallEvent::CallStart) == 1
//!     })
//!     .await
//!     .unwrap();
//! }
//! ```

pub mod cluster_bus;
pub mod eventual;
pub mod fixtures;
pub mod mock_media;
pub mod mock_platform;

pub use cluster_bus::MemoryClusterBus;
pub use eventual::assert_eventually;
pub use fixtures::*;
pub use mock_media::{MockMediaCoordinator, MockMediaEngine};
pub use mock_platform::{MockPlatform, PublishedEvent};
