//! Integration tests for the single-node session lifecycle.
//!
//! Each test drives a controller through the host hooks with a mock
//! platform, a mock media engine and in-memory call state.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use async_trait::async_trait;
use calls_service::platform::{AnalyticsEvent, BroadcastTarget, CallEvent};
use calls_service::rtc::{RtcMessage, RtcMessageType};
use calls_service::state::{MemoryStateStore, VersionedRecord, VersionedStore};
use calls_service::CallsError;
use calls_test_utils::*;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

async fn joined_node() -> TestNode {
    let node = TestNode::builder("node-a").build().await;
    node.send("conn-a", "alice", join_request("chan-1")).await;
    wait_for_join(&node, "conn-a").await;
    node
}

async fn wait_for_join(node: &TestNode, connection_id: &str) {
    assert_eventually(WAIT, || async {
        node.platform
            .events_of(CallEvent::Join)
            .iter()
            .any(|e| e.payload["connID"] == connection_id)
    })
    .await
    .expect("join should complete");
}

/// First join creates the call, starts the media session and announces it.
#[tokio::test]
async fn test_first_join_starts_call() {
    let node = joined_node().await;

    let state = node.channel_state("chan-1").await.expect("state exists");
    assert_eq!(state.node_id, "node-a");
    let call = state.call.expect("call exists");
    assert_eq!(call.owner_id, "alice");
    assert!(call.users.contains_key("alice"));
    assert_eq!(call.sessions["conn-a"].user_id, "alice");
    assert_eq!(call.thread_id, format!("thread-chan-1-{}", call.start_at));

    let starts = node.platform.events_of(CallEvent::CallStart);
    assert_eq!(starts.len(), 1);
    assert_eq!(starts[0].target, BroadcastTarget::Channel("chan-1".to_string()));
    assert_eq!(starts[0].payload["owner_id"], "alice");
    assert_eq!(starts[0].payload["channelID"], "chan-1");

    let joins = node.platform.events_of(CallEvent::Join);
    assert_eq!(joins[0].target, BroadcastTarget::User("alice".to_string()));
    assert_eq!(node.platform.count(CallEvent::UserConnected), 1);

    assert!(node.engine().has_session("conn-a"));
    assert_eq!(node.platform.analytics_count(AnalyticsEvent::CallStarted), 1);
    assert_eq!(node.platform.analytics_count(AnalyticsEvent::UserJoined), 1);
}

/// A second participant joins the existing call without restarting it.
#[tokio::test]
async fn test_second_join_does_not_restart_call() {
    let node = joined_node().await;
    node.send("conn-b", "bob", join_request("chan-1")).await;
    wait_for_join(&node, "conn-b").await;

    assert_eq!(node.platform.count(CallEvent::CallStart), 1);
    assert_eq!(node.platform.count(CallEvent::UserConnected), 2);
    assert_eq!(node.platform.threads().len(), 1);

    let call = node.channel_state("chan-1").await.unwrap().call.unwrap();
    assert_eq!(call.owner_id, "alice");
    assert_eq!(call.users.len(), 2);
}

/// Concurrent first joins start exactly one call.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_joins_start_one_call() {
    let node = TestNode::builder("node-a").build().await;

    for i in 0..8 {
        node.send(&format!("conn-{i}"), &format!("user-{i}"), join_request("chan-1"))
            .await;
    }

    assert_eventually(WAIT, || async { node.platform.count(CallEvent::Join) == 8 })
        .await
        .expect("all joins should complete");

    assert_eq!(node.platform.count(CallEvent::CallStart), 1);
    let call = node.channel_state("chan-1").await.unwrap().call.unwrap();
    assert_eq!(call.users.len(), 8);
    assert_eq!(call.sessions.len(), 8);
}

/// A join without permission gets an error event and changes nothing.
#[tokio::test]
async fn test_join_forbidden() {
    let platform = Arc::new(MockPlatform::new().with_denied_user("mallory"));
    let node = TestNode::builder("node-a").platform(platform).build().await;

    node.send("conn-m", "mallory", join_request("chan-1")).await;

    assert_eventually(WAIT, || async { node.platform.count(CallEvent::Error) == 1 })
        .await
        .unwrap();
    let error = &node.platform.events_of(CallEvent::Error)[0];
    assert_eq!(error.target, BroadcastTarget::User("mallory".to_string()));
    assert_eq!(error.payload, json!({"data": "forbidden", "connID": "conn-m"}));

    assert!(node.channel_state("chan-1").await.is_none());
    assert!(!node.has_session("conn-m").await);
    assert_eq!(node.platform.count(CallEvent::CallStart), 0);
}

/// Archived channels cannot host calls.
#[tokio::test]
async fn test_join_archived_channel() {
    let platform = Arc::new(MockPlatform::new().with_archived_channel("chan-old"));
    let node = TestNode::builder("node-a").platform(platform).build().await;

    node.send("conn-a", "alice", join_request("chan-old")).await;

    assert_eventually(WAIT, || async { node.platform.count(CallEvent::Error) == 1 })
        .await
        .unwrap();
    assert_eq!(
        node.platform.events_of(CallEvent::Error)[0].payload["data"],
        "cannot join call in archived channel"
    );
    assert!(node.channel_state("chan-old").await.is_none());
}

/// Joins past the participant limit are rejected.
#[tokio::test]
async fn test_join_capacity() {
    let node = TestNode::builder("node-a").max_participants(1).build().await;
    node.send("conn-a", "alice", join_request("chan-1")).await;
    wait_for_join(&node, "conn-a").await;

    node.send("conn-b", "bob", join_request("chan-1")).await;
    assert_eventually(WAIT, || async { node.platform.count(CallEvent::Error) == 1 })
        .await
        .unwrap();

    assert_eq!(
        node.platform.events_of(CallEvent::Error)[0].payload["data"],
        "call is at capacity"
    );
    let call = node.channel_state("chan-1").await.unwrap().call.unwrap();
    assert_eq!(call.users.len(), 1);
}

/// A failing thread creation does not block the call.
#[tokio::test]
async fn test_thread_failure_still_starts_call() {
    let platform = Arc::new(MockPlatform::new().with_failing_threads());
    let node = TestNode::builder("node-a").platform(platform).build().await;

    node.send("conn-a", "alice", join_request("chan-1")).await;
    wait_for_join(&node, "conn-a").await;

    let starts = node.platform.events_of(CallEvent::CallStart);
    assert_eq!(starts.len(), 1);
    assert_eq!(starts[0].payload["thread_id"], "");
    let call = node.channel_state("chan-1").await.unwrap().call.unwrap();
    assert!(call.thread_id.is_empty());
}

/// Explicit leaves tear sessions down; the last one ends the call.
#[tokio::test]
async fn test_leave_ends_call_when_empty() {
    let node = joined_node().await;
    node.send("conn-b", "bob", join_request("chan-1")).await;
    wait_for_join(&node, "conn-b").await;

    node.send("conn-a", "alice", leave_request()).await;
    assert_eventually(WAIT, || async {
        node.platform.count(CallEvent::UserDisconnected) == 1
    })
    .await
    .unwrap();

    assert!(!node.has_session("conn-a").await);
    assert!(node.engine().closed().contains(&"conn-a".to_string()));
    let call = node.channel_state("chan-1").await.unwrap().call.unwrap();
    assert!(!call.users.contains_key("alice"));
    assert_eq!(node.platform.count(CallEvent::CallEnd), 0);

    node.send("conn-b", "bob", leave_request()).await;
    assert_eventually(WAIT, || async { node.platform.count(CallEvent::CallEnd) == 1 })
        .await
        .unwrap();

    assert!(node.channel_state("chan-1").await.is_none());
    assert!(node.controller.registry().is_empty().await);
    assert_eq!(node.platform.analytics_count(AnalyticsEvent::UserLeft), 2);
}

/// A user with two connections stays in the call until both are gone.
#[tokio::test]
async fn test_user_disconnected_only_after_last_connection() {
    let node = joined_node().await;
    node.send("conn-a2", "alice", join_request("chan-1")).await;
    wait_for_join(&node, "conn-a2").await;

    node.send("conn-a", "alice", leave_request()).await;
    assert_eventually(WAIT, || async { !node.has_session("conn-a").await })
        .await
        .unwrap();
    assert_eventually(WAIT, || async {
        node.channel_state("chan-1")
            .await
            .and_then(|s| s.call)
            .is_some_and(|c| !c.sessions.contains_key("conn-a"))
    })
    .await
    .unwrap();

    assert_eq!(node.platform.count(CallEvent::UserDisconnected), 0);
    let call = node.channel_state("chan-1").await.unwrap().call.unwrap();
    assert!(call.users.contains_key("alice"));
}

/// A dropped transport keeps the session through the grace period, then
/// removes it.
#[tokio::test(start_paused = true)]
async fn test_grace_period_expiry_removes_session() {
    let node = joined_node().await;

    node.disconnect("conn-a").await;
    assert!(node.has_session("conn-a").await);
    assert!(node.channel_state("chan-1").await.is_some());

    assert_eventually(Duration::from_secs(30), || async {
        node.channel_state("chan-1").await.is_none()
    })
    .await
    .expect("call should end after the grace period");

    assert!(!node.has_session("conn-a").await);
    assert!(node.engine().closed().contains(&"conn-a".to_string()));
    assert_eq!(node.platform.count(CallEvent::CallEnd), 1);
}

/// Reconnecting within the grace period keeps the call and media session.
#[tokio::test]
async fn test_reconnect_within_grace_period() {
    let node = joined_node().await;

    node.disconnect("conn-a").await;
    node.send("conn-a2", "alice", reconnect_request("chan-1", "conn-a", "conn-a"))
        .await;

    assert_eventually(WAIT, || async {
        node.has_session("conn-a2").await && !node.has_session("conn-a").await
    })
    .await
    .unwrap();

    let call = node.channel_state("chan-1").await.unwrap().call.unwrap();
    assert!(call.sessions.contains_key("conn-a"));
    assert!(node.engine().closed().is_empty());
    assert!(node.engine().has_session("conn-a"));
    assert_eq!(node.platform.count(CallEvent::UserDisconnected), 0);

    // media stays keyed by the original connection
    node.send("conn-a2", "alice", packed_sdp_request("v=0 offer")).await;
    assert_eventually(WAIT, || async { !node.engine().sent().is_empty() })
        .await
        .unwrap();
    let sent = node.engine().sent();
    assert_eq!(sent[0].session_id, "conn-a");
    assert_eq!(sent[0].msg_type, RtcMessageType::Sdp);
    assert_eq!(sent[0].data, b"v=0 offer");
}

/// Only the first reconnect for a connection wins.
#[tokio::test]
async fn test_second_reconnect_rejected() {
    let node = joined_node().await;

    node.send("conn-a2", "alice", reconnect_request("chan-1", "conn-a", "conn-a"))
        .await;
    assert_eventually(WAIT, || async { node.has_session("conn-a2").await })
        .await
        .unwrap();

    node.send("conn-a3", "alice", reconnect_request("chan-1", "conn-a", "conn-a"))
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(!node.has_session("conn-a3").await);
    assert!(node.has_session("conn-a2").await);
}

/// Two reconnects racing for the same connection: exactly one takes over.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reconnects_one_session() {
    let node = joined_node().await;

    tokio::join!(
        node.send("conn-a2", "alice", reconnect_request("chan-1", "conn-a", "conn-a")),
        node.send("conn-a3", "alice", reconnect_request("chan-1", "conn-a", "conn-a")),
    );
    assert_eventually(WAIT, || async {
        node.has_session("conn-a2").await || node.has_session("conn-a3").await
    })
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let a2 = node.has_session("conn-a2").await;
    let a3 = node.has_session("conn-a3").await;
    assert!(a2 ^ a3, "exactly one reconnect should win (a2={a2}, a3={a3})");
    assert!(!node.has_session("conn-a").await);

    let current = node
        .controller
        .registry()
        .get_by_original("conn-a")
        .await
        .unwrap();
    assert_eq!(current.connection_id(), if a2 { "conn-a2" } else { "conn-a3" });
    assert!(node.engine().has_session("conn-a"));
    assert_eq!(node.platform.count(CallEvent::UserDisconnected), 0);
}

/// Reconnects naming an unknown connection or channel are rejected.
#[tokio::test]
async fn test_reconnect_unknown_session() {
    let node = joined_node().await;

    node.send("conn-x", "alice", reconnect_request("chan-1", "conn-zzz", "conn-zzz"))
        .await;
    node.send("conn-y", "alice", reconnect_request("chan-2", "conn-a", "conn-a"))
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(!node.has_session("conn-x").await);
    assert!(!node.has_session("conn-y").await);
    assert!(node.has_session("conn-a").await);
}

/// Only one participant can share their screen.
#[tokio::test]
async fn test_screen_share_is_exclusive() {
    let node = joined_node().await;
    node.send("conn-b", "bob", join_request("chan-1")).await;
    wait_for_join(&node, "conn-b").await;

    node.send("conn-a", "alice", screen_on_request("S1")).await;
    assert_eventually(WAIT, || async { node.platform.count(CallEvent::UserScreenOn) == 1 })
        .await
        .unwrap();

    node.send("conn-b", "bob", screen_on_request("S2")).await;
    // processed in order after the rejected screen_on
    node.send("conn-b", "bob", simple_request("voice_on")).await;
    assert_eventually(WAIT, || async { node.platform.count(CallEvent::UserVoiceOn) == 1 })
        .await
        .unwrap();

    assert_eq!(node.platform.count(CallEvent::UserScreenOn), 1);
    let call = node.channel_state("chan-1").await.unwrap().call.unwrap();
    assert_eq!(call.screen_sharing_id, "alice");
    assert_eq!(call.screen_stream_id, "S1");

    node.send("conn-a", "alice", simple_request("screen_off")).await;
    assert_eventually(WAIT, || async { node.platform.count(CallEvent::UserScreenOff) == 1 })
        .await
        .unwrap();
    let call = node.channel_state("chan-1").await.unwrap().call.unwrap();
    assert!(call.screen_sharing_id.is_empty());
    assert!(call.screen_stream_id.is_empty());
}

/// Leaving while sharing clears the share and announces it.
#[tokio::test]
async fn test_sharer_leaving_clears_share() {
    let node = joined_node().await;
    node.send("conn-b", "bob", join_request("chan-1")).await;
    wait_for_join(&node, "conn-b").await;

    node.send("conn-a", "alice", screen_on_request("S1")).await;
    assert_eventually(WAIT, || async { node.platform.count(CallEvent::UserScreenOn) == 1 })
        .await
        .unwrap();

    node.send("conn-a", "alice", leave_request()).await;
    assert_eventually(WAIT, || async {
        node.platform.count(CallEvent::UserDisconnected) == 1
    })
    .await
    .unwrap();

    assert_eq!(node.platform.count(CallEvent::UserScreenOff), 1);
    let call = node.channel_state("chan-1").await.unwrap().call.unwrap();
    assert!(call.screen_sharing_id.is_empty());
}

/// Simultaneous screen_on from two users: exactly one share wins.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_screen_share_one_winner() {
    let node = joined_node().await;
    node.send("conn-b", "bob", join_request("chan-1")).await;
    wait_for_join(&node, "conn-b").await;

    tokio::join!(
        node.send("conn-a", "alice", screen_on_request("S1")),
        node.send("conn-b", "bob", screen_on_request("S2")),
    );
    // both queues drained once each user's voice_on has been handled
    node.send("conn-a", "alice", simple_request("voice_on")).await;
    node.send("conn-b", "bob", simple_request("voice_on")).await;
    assert_eventually(WAIT, || async { node.platform.count(CallEvent::UserVoiceOn) == 2 })
        .await
        .unwrap();

    let screen_on = node.platform.events_of(CallEvent::UserScreenOn);
    assert_eq!(screen_on.len(), 1);
    let call = node.channel_state("chan-1").await.unwrap().call.unwrap();
    assert_eq!(call.screen_sharing_id, screen_on[0].payload["userID"]);
    let expected_stream = if call.screen_sharing_id == "alice" { "S1" } else { "S2" };
    assert_eq!(call.screen_stream_id, expected_stream);
}

/// Two users share, conflict, stop and leave; the call starts once and the
/// record is gone at the end.
#[tokio::test]
async fn test_two_user_call_end_to_end() {
    let node = joined_node().await;
    node.send("conn-b", "bob", join_request("chan-1")).await;
    wait_for_join(&node, "conn-b").await;
    assert_eq!(node.platform.count(CallEvent::CallStart), 1);

    node.send("conn-a", "alice", screen_on_request("S1")).await;
    assert_eventually(WAIT, || async { node.platform.count(CallEvent::UserScreenOn) == 1 })
        .await
        .unwrap();

    node.send("conn-b", "bob", screen_on_request("S2")).await;
    node.send("conn-b", "bob", simple_request("screen_off")).await;
    node.send("conn-b", "bob", simple_request("voice_on")).await;
    assert_eventually(WAIT, || async { node.platform.count(CallEvent::UserVoiceOn) == 1 })
        .await
        .unwrap();
    let call = node.channel_state("chan-1").await.unwrap().call.unwrap();
    assert_eq!(call.screen_sharing_id, "alice");
    assert_eq!(call.screen_stream_id, "S1");
    assert_eq!(node.platform.count(CallEvent::UserScreenOff), 0);

    node.send("conn-a", "alice", simple_request("screen_off")).await;
    assert_eventually(WAIT, || async { node.platform.count(CallEvent::UserScreenOff) == 1 })
        .await
        .unwrap();

    node.send("conn-a", "alice", leave_request()).await;
    node.send("conn-b", "bob", leave_request()).await;
    assert_eventually(WAIT, || async { node.platform.count(CallEvent::CallEnd) == 1 })
        .await
        .unwrap();

    assert!(node.channel_state("chan-1").await.is_none());
    assert_eq!(node.platform.count(CallEvent::CallStart), 1);
    assert_eq!(node.platform.count(CallEvent::UserDisconnected), 2);
    assert!(!node.has_session("conn-a").await);
    assert!(!node.has_session("conn-b").await);
}

/// Store whose writes land immediately but report back late once
/// `slow` is set.
#[derive(Default)]
struct SlowAckStore {
    inner: MemoryStateStore,
    slow: AtomicBool,
}

#[async_trait]
impl VersionedStore for SlowAckStore {
    async fn get(&self, key: &str) -> Result<VersionedRecord, CallsError> {
        self.inner.get(key).await
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: u64,
        data: Option<Vec<u8>>,
    ) -> Result<bool, CallsError> {
        let written = self.inner.compare_and_set(key, expected, data).await?;
        if self.slow.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        Ok(written)
    }
}

/// A transport close while a handler is mid-flight does not cut it short:
/// the committed flag is still announced.
#[tokio::test]
async fn test_handler_in_flight_finishes_after_transport_close() {
    let store = Arc::new(SlowAckStore::default());
    let node = TestNode::builder("node-a")
        .store(Arc::clone(&store) as Arc<dyn VersionedStore>)
        .build()
        .await;
    node.send("conn-a", "alice", join_request("chan-1")).await;
    wait_for_join(&node, "conn-a").await;

    store.slow.store(true, Ordering::SeqCst);
    node.send("conn-a", "alice", simple_request("unmute")).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    node.disconnect("conn-a").await;

    assert_eventually(WAIT, || async { node.platform.count(CallEvent::UserUnmuted) == 1 })
        .await
        .expect("committed unmute should be announced");
    let call = node.channel_state("chan-1").await.unwrap().call.unwrap();
    assert!(call.users["alice"].unmuted);
    assert_eq!(
        node.engine()
            .sent()
            .iter()
            .filter(|m| m.msg_type == RtcMessageType::Unmute)
            .count(),
        1
    );
}

/// Mute, unmute and raised hands are stored and announced.
#[tokio::test]
async fn test_participant_flags() {
    let node = joined_node().await;

    node.send("conn-a", "alice", simple_request("unmute")).await;
    node.send("conn-a", "alice", simple_request("raise_hand")).await;
    assert_eventually(WAIT, || async { node.platform.count(CallEvent::UserRaiseHand) == 1 })
        .await
        .unwrap();

    let call = node.channel_state("chan-1").await.unwrap().call.unwrap();
    assert!(call.users["alice"].unmuted);
    assert!(call.users["alice"].raised_hand > 0);
    assert_eq!(node.platform.count(CallEvent::UserUnmuted), 1);

    let raised = &node.platform.events_of(CallEvent::UserRaiseHand)[0];
    assert_eq!(raised.payload["userID"], "alice");
    assert_eq!(raised.payload["raised_hand"], call.users["alice"].raised_hand);

    let types: Vec<RtcMessageType> = node.engine().sent().iter().map(|m| m.msg_type).collect();
    assert_eq!(types, vec![RtcMessageType::Unmute]);

    node.send("conn-a", "alice", simple_request("mute")).await;
    node.send("conn-a", "alice", simple_request("unraise_hand")).await;
    assert_eventually(WAIT, || async {
        node.platform.count(CallEvent::UserUnraiseHand) == 1
    })
    .await
    .unwrap();

    let call = node.channel_state("chan-1").await.unwrap().call.unwrap();
    assert!(!call.users["alice"].unmuted);
    assert_eq!(call.users["alice"].raised_hand, 0);
}

/// Reactions are broadcast without delivery guarantees.
#[tokio::test]
async fn test_reaction_is_unreliable_broadcast() {
    let node = joined_node().await;

    node.send("conn-a", "alice", react_request("+1")).await;
    assert_eventually(WAIT, || async { node.platform.count(CallEvent::UserReaction) == 1 })
        .await
        .unwrap();

    let reaction = &node.platform.events_of(CallEvent::UserReaction)[0];
    assert!(!reaction.reliable);
    assert_eq!(reaction.payload["emoji"], "+1");
    assert_eq!(reaction.payload["userID"], "alice");
    assert_eq!(reaction.target, BroadcastTarget::Channel("chan-1".to_string()));
}

/// Messages beyond the burst are dropped.
#[tokio::test]
async fn test_rate_limited_messages_are_dropped() {
    let node = TestNode::builder("node-a").rate_limit(0, 3).build().await;
    node.send("conn-a", "alice", join_request("chan-1")).await;
    wait_for_join(&node, "conn-a").await;

    for _ in 0..6 {
        node.send("conn-a", "alice", simple_request("voice_on")).await;
    }

    assert_eventually(WAIT, || async { node.platform.count(CallEvent::UserVoiceOn) == 3 })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(node.platform.count(CallEvent::UserVoiceOn), 3);
}

/// Messages from connections without a session are ignored.
#[tokio::test]
async fn test_message_without_session_ignored() {
    let node = joined_node().await;

    node.send("conn-unknown", "eve", simple_request("voice_on")).await;
    node.send("conn-a", "alice", simple_request("voice_off")).await;
    assert_eventually(WAIT, || async { node.platform.count(CallEvent::UserVoiceOff) == 1 })
        .await
        .unwrap();

    assert_eq!(node.platform.count(CallEvent::UserVoiceOn), 0);
}

/// Outbound media messages reach the owning user as signal events.
#[tokio::test]
async fn test_signal_delivered_to_user() {
    let node = joined_node().await;

    node.engine()
        .emit(RtcMessage {
            session_id: "conn-a".to_string(),
            msg_type: RtcMessageType::Sdp,
            data: b"answer".to_vec(),
        })
        .await;

    assert_eventually(WAIT, || async { node.platform.count(CallEvent::Signal) == 1 })
        .await
        .unwrap();
    let signal = &node.platform.events_of(CallEvent::Signal)[0];
    assert_eq!(signal.target, BroadcastTarget::User("alice".to_string()));
    assert_eq!(signal.payload, json!({"data": "answer", "connID": "conn-a"}));
}

/// The media engine closing a session ends it without waiting.
#[tokio::test]
async fn test_media_close_ends_session() {
    let node = joined_node().await;

    assert!(node.engine().trigger_close("conn-a"));

    assert_eventually(WAIT, || async { node.channel_state("chan-1").await.is_none() })
        .await
        .unwrap();
    assert!(!node.has_session("conn-a").await);
    assert!(node.engine().closed().is_empty());
}

/// A media engine failure during join tears the session down.
#[tokio::test]
async fn test_media_init_failure_reports_error() {
    let node = TestNode::builder("node-a").build().await;
    node.engine().fail_init(true);

    node.send("conn-a", "alice", join_request("chan-1")).await;
    assert_eventually(WAIT, || async { node.platform.count(CallEvent::Error) == 1 })
        .await
        .unwrap();
    assert_eventually(WAIT, || async { node.channel_state("chan-1").await.is_none() })
        .await
        .unwrap();

    assert_eq!(
        node.platform.events_of(CallEvent::Error)[0].payload["data"],
        "an internal error occurred"
    );
    assert!(!node.has_session("conn-a").await);
}

/// Shutdown leaves every session.
#[tokio::test]
async fn test_shutdown_leaves_sessions() {
    let node = joined_node().await;
    let store = Arc::clone(&node.store);

    node.shutdown(Duration::from_secs(5)).await;

    let record = store.get("calls:channel:chan-1:state").await.unwrap();
    assert!(record.data.is_none());
}
