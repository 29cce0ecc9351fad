//! Presence tracking.
//!
//! Presence records which users are subscribed to a channel, for
//! subscriptions whose handler asked for it.

use chrono::{DateTime, Utc};
use live_protocol::ClientInfo;
use std::collections::HashMap;
use tracing::debug;

/// Presence state for a single connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceState {
    pub info: ClientInfo,
    /// When the connection joined.
    pub joined_at: DateTime<Utc>,
}

/// Presence tracker for a channel.
#[derive(Debug, Default)]
pub struct Presence {
    /// Map of client ID to presence state.
    members: HashMap<String, PresenceState>,
}

impl Presence {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of present members.
    #[must_use]
    pub fn count(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_present(&self, client_id: &str) -> bool {
        self.members.contains_key(client_id)
    }

    /// Add a member to presence.
    ///
    /// Returns `true` if this is a new member.
    pub fn join(&mut self, info: ClientInfo) -> bool {
        let client_id = info.client_id.clone();
        let state = PresenceState {
            info,
            joined_at: Utc::now(),
        };
        let is_new = self.members.insert(client_id.clone(), state).is_none();
        if is_new {
            debug!(client = %client_id, "Presence: member joined");
        }
        is_new
    }

    /// Remove a member from presence.
    pub fn leave(&mut self, client_id: &str) -> Option<PresenceState> {
        let state = self.members.remove(client_id);
        if state.is_some() {
            debug!(client = %client_id, "Presence: member left");
        }
        state
    }

    /// Snapshot of all present members.
    #[must_use]
    pub fn snapshot(&self) -> Vec<PresenceState> {
        self.members.values().cloned().collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
