//! Durable per-channel call record.
//!
//! All helpers here are pure so they can run inside a compare-and-swap
//! mutator that may be retried.

use crate::errors::CallsError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-channel record stored under `calls:channel:{id}:state`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelState {
    /// Node holding the live media transport for this channel's call.
    /// Empty when a remote media coordination service is used.
    #[serde(default)]
    pub node_id: String,

    /// Call in progress, if any.
    #[serde(default)]
    pub call: Option<CallState>,
}

/// Participant flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserState {
    #[serde(default)]
    pub unmuted: bool,
    /// Unix millis when the hand was raised, 0 when lowered.
    #[serde(default)]
    pub raised_hand: i64,
}

/// Connection bound to a participant, used to validate reconnects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionBinding {
    pub user_id: String,
}

/// Call in progress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallState {
    pub id: String,
    pub start_at: i64,
    pub owner_id: String,
    #[serde(default)]
    pub thread_id: String,
    /// Participants by user ID.
    #[serde(default)]
    pub users: HashMap<String, UserState>,
    /// Session bindings by original connection ID.
    #[serde(default)]
    pub sessions: HashMap<String, SessionBinding>,
    #[serde(default)]
    pub screen_sharing_id: String,
    #[serde(default)]
    pub screen_stream_id: String,
}

impl CallState {
    /// New call owned by `owner_id`.
    pub fn new(owner_id: &str, start_at: i64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            start_at,
            owner_id: owner_id.to_string(),
            ..Self::default()
        }
    }

    /// Bind `connection_id` to `user_id`, adding the participant if new.
    pub fn add_session(&mut self, user_id: &str, connection_id: &str) {
        self.users.entry(user_id.to_string()).or_default();
        self.sessions.insert(
            connection_id.to_string(),
            SessionBinding {
                user_id: user_id.to_string(),
            },
        );
    }

    /// Drop `connection_id`.
    ///
    /// The participant entry goes away once the user has no bindings left,
    /// and so does any screen share they held. Returns whether the user left.
    pub fn remove_session(&mut self, user_id: &str, connection_id: &str) -> bool {
        self.sessions.remove(connection_id);

        let still_bound = self.sessions.values().any(|b| b.user_id == user_id);
        if still_bound {
            return false;
        }

        self.users.remove(user_id);
        if self.screen_sharing_id == user_id {
            self.screen_sharing_id.clear();
            self.screen_stream_id.clear();
        }
        true
    }

    /// Whether nobody is left in the call.
    pub fn is_empty(&self) -> bool {
        self.users.is_empty() && self.sessions.is_empty()
    }

    /// Claim the screen share for `user_id`.
    pub fn start_screen_share(&mut self, user_id: &str, stream_id: &str) -> Result<(), CallsError> {
        if !self.screen_sharing_id.is_empty() {
            return Err(CallsError::ScreenShareConflict(format!(
                "cannot start screen sharing, someone else is sharing already: {:?}",
                self.screen_sharing_id
            )));
        }
        self.screen_sharing_id = user_id.to_string();
        self.screen_stream_id = stream_id.to_string();
        Ok(())
    }

    /// Release the screen share held by `user_id`.
    pub fn stop_screen_share(&mut self, user_id: &str) -> Result<(), CallsError> {
        if self.screen_sharing_id != user_id {
            return Err(CallsError::ScreenShareConflict(format!(
                "cannot stop screen sharing, someone else is sharing: {:?}",
                self.screen_sharing_id
            )));
        }
        self.screen_sharing_id.clear();
        self.screen_stream_id.clear();
        Ok(())
    }

    pub fn set_unmuted(&mut self, user_id: &str, unmuted: bool) {
        if let Some(user) = self.users.get_mut(user_id) {
            user.unmuted = unmuted;
        }
    }

    pub fn set_raised_hand(&mut self, user_id: &str, raised_at: i64) {
        if let Some(user) = self.users.get_mut(user_id) {
            user.raised_hand = raised_at;
        }
    }
}
