//! Messages flowing through the hub.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use live_protocol::ClientInfo;

/// A published message, also the unit of retained history.
///
/// Immutable once created; subscribers and the history ring share it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveMessage {
    /// Per-channel offset, strictly increasing from 1.
    pub offset: u64,
    pub org_id: i64,
    /// Channel in `scope/namespace/path` form.
    pub channel: String,
    /// Payload (shared for zero-copy broadcast).
    pub data: Bytes,
    pub published: DateTime<Utc>,
}

impl LiveMessage {
    /// Get the payload size in bytes.
    #[must_use]
    pub fn payload_size(&self) -> usize {
        self.data.len()
    }
}

/// Event delivered to the subscribers of a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubEvent {
    Publication(LiveMessage),
    /// A join/leave subscriber arrived.
    Join(ClientInfo),
    /// A join/leave subscriber went away.
    Leave(ClientInfo),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_size() {
        let msg = LiveMessage {
            offset: 1,
            org_id: 1,
            channel: "core/broadcast/x".to_string(),
            data: Bytes::from_static(b"hello"),
            published: Utc::now(),
        };
        assert_eq!(msg.payload_size(), 5);
    }
}
