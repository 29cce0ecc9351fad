//! A single org-scoped channel: subscribers, broadcast and retained history.
//!
//! Channels are not locked on their own; the hub holds each one inside a
//! map entry and every mutation happens under that entry's lock.

use crate::message::{HubEvent, LiveMessage};
use bytes::Bytes;
use chrono::Utc;
use live_protocol::ClientInfo;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Default broadcast channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// History retention requested by a publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Retention {
    /// Messages kept. `0` keeps none.
    pub size: usize,
    /// Age after which a message is dropped. `None` never expires.
    pub ttl: Option<Duration>,
}

impl Retention {
    /// No history.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.size > 0
    }
}

#[derive(Debug)]
struct Retained {
    message: LiveMessage,
    expires_at: Option<Instant>,
}

impl Retained {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// A subscribed connection.
#[derive(Debug, Clone)]
pub struct Subscriber {
    pub info: ClientInfo,
    /// Whether join/leave events are broadcast for this subscriber.
    pub join_leave: bool,
}

/// A channel for pub/sub messaging.
#[derive(Debug)]
pub struct Channel {
    org_id: i64,
    /// Channel name without the org prefix.
    name: String,
    sender: broadcast::Sender<Arc<HubEvent>>,
    /// Subscribers by client id.
    subscribers: HashMap<String, Subscriber>,
    history: VecDeque<Retained>,
    /// Retention of the latest publish that asked for history.
    retention: Retention,
    last_offset: u64,
}

impl Channel {
    #[must_use]
    pub fn new(org_id: i64, name: impl Into<String>) -> Self {
        Self::with_capacity(org_id, name, DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new channel with a specific broadcast capacity.
    #[must_use]
    pub fn with_capacity(org_id: i64, name: impl Into<String>, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            org_id,
            name: name.into(),
            sender,
            subscribers: HashMap::new(),
            history: VecDeque::new(),
            retention: Retention::none(),
            last_offset: 0,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    #[must_use]
    pub fn is_subscribed(&self, client_id: &str) -> bool {
        self.subscribers.contains_key(client_id)
    }

    /// Subscribe a connection.
    ///
    /// With `join_leave`, the join is broadcast before the receiver is
    /// created, so the newcomer does not see its own join.
    pub fn subscribe(
        &mut self,
        info: ClientInfo,
        join_leave: bool,
    ) -> broadcast::Receiver<Arc<HubEvent>> {
        if join_leave {
            let _ = self.sender.send(Arc::new(HubEvent::Join(info.clone())));
        }
        debug!(channel = %self.name, org_id = self.org_id, client = %info.client_id, "Client subscribed");
        self.subscribers.insert(
            info.client_id.clone(),
            Subscriber { info, join_leave },
        );
        self.sender.subscribe()
    }

    /// Unsubscribe a connection, broadcasting its leave if it joined with
    /// join/leave events.
    pub fn unsubscribe(&mut self, client_id: &str) -> Option<Subscriber> {
        let removed = self.subscribers.remove(client_id)?;
        if removed.join_leave {
            let _ = self
                .sender
                .send(Arc::new(HubEvent::Leave(removed.info.clone())));
        }
        debug!(channel = %self.name, org_id = self.org_id, client = %client_id, "Client unsubscribed");
        Some(removed)
    }

    /// Publish a payload.
    ///
    /// Assigns the next offset, retains the message when `retention` asks
    /// for history, and broadcasts it. Returns the message and the number of
    /// receivers it was handed to.
    pub fn publish(&mut self, data: Bytes, retention: Retention) -> (LiveMessage, usize) {
        self.last_offset += 1;
        let message = LiveMessage {
            offset: self.last_offset,
            org_id: self.org_id,
            channel: self.name.clone(),
            data,
            published: Utc::now(),
        };

        if retention.is_enabled() {
            let now = Instant::now();
            self.retention = retention;
            self.history.push_back(Retained {
                message: message.clone(),
                expires_at: retention.ttl.map(|ttl| now + ttl),
            });
            self.prune(now);
        }

        let recipients = self
            .sender
            .send(Arc::new(HubEvent::Publication(message.clone())))
            .unwrap_or_default();
        trace!(channel = %self.name, offset = message.offset, recipients, "Publishing message");
        (message, recipients)
    }

    /// Retained messages still within retention, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<LiveMessage> {
        let now = Instant::now();
        let skip = self.history.len().saturating_sub(self.retention.size);
        self.history
            .iter()
            .skip(skip)
            .filter(|r| !r.is_expired(now))
            .map(|r| r.message.clone())
            .collect()
    }

    /// Drop messages past the size limit or their TTL.
    pub fn prune(&mut self, now: Instant) {
        while self.history.len() > self.retention.size {
            self.history.pop_front();
        }
        self.history.retain(|r| !r.is_expired(now));
    }

    #[must_use]
    pub fn subscribers(&self) -> Vec<Subscriber> {
        self.subscribers.values().cloned().collect()
    }

    /// No subscribers and nothing retained.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.subscribers.is_empty() && self.history.is_empty()
    }
}
