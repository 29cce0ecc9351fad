//! In-process pub/sub hub.
//!
//! The hub owns every org-scoped channel, its subscribers, presence set and
//! retained history. Channels live in a [`DashMap`] so unrelated channels
//! never contend; all work on one channel happens under its entry lock,
//! which is what orders publishes per channel.

use crate::channel::{Channel, Retention, Subscriber};
use crate::message::{HubEvent, LiveMessage};
use crate::presence::{Presence, PresenceState};
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use live_protocol::{org_channel, ClientInfo};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, trace};

/// Hub errors.
#[derive(Debug, Error)]
pub enum HubError {
    /// Maximum channels reached.
    #[error("Maximum channels reached")]
    MaxChannelsReached,

    /// Maximum subscriptions reached.
    #[error("Maximum subscriptions reached")]
    MaxSubscriptionsReached,

    /// Already subscribed to channel.
    #[error("Already subscribed to channel: {0}")]
    AlreadySubscribed(String),

    /// Not subscribed to channel.
    #[error("Not subscribed to channel: {0}")]
    NotSubscribed(String),
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Maximum number of live channels across all orgs.
    pub max_channels: usize,
    /// Maximum subscriptions per connection.
    pub max_subscriptions_per_connection: usize,
    /// Channel broadcast capacity.
    pub channel_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_channels: 10_000,
            max_subscriptions_per_connection: 100,
            channel_capacity: 1024,
        }
    }
}

/// How a subscription behaves, as decided by the channel handler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscribeOptions {
    pub presence: bool,
    pub join_leave: bool,
    pub recover: bool,
}

/// An established subscription.
#[derive(Debug)]
pub struct Subscription {
    /// Live events from the moment of subscribing.
    pub receiver: broadcast::Receiver<Arc<HubEvent>>,
    /// Retained history at the moment of subscribing, oldest first. Empty
    /// unless recovery was requested.
    pub recovered: Vec<LiveMessage>,
}

/// Result of a publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishResult {
    /// Offset assigned to the message, `None` when the channel had neither
    /// subscribers nor history to keep.
    pub offset: Option<u64>,
    /// Receivers the message was handed to.
    pub recipients: usize,
}

/// Channel entry with presence tracking.
struct ChannelEntry {
    channel: Channel,
    presence: Presence,
}

impl ChannelEntry {
    fn new(org_id: i64, name: &str, capacity: usize) -> Self {
        Self {
            channel: Channel::with_capacity(org_id, name, capacity),
            presence: Presence::new(),
        }
    }
}

/// The transport-facing side of the hub, used by code that only needs to
/// push data and count subscribers.
pub trait ChannelPublisher: Send + Sync {
    /// Broadcast `data` to the current subscribers of a channel.
    ///
    /// Returns the number of receivers.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub refuses the publish.
    fn publish(&self, org_id: i64, channel: &str, data: Bytes) -> Result<usize, HubError>;

    /// Current number of subscribers of a channel.
    fn client_count(&self, org_id: i64, channel: &str) -> usize;
}

/// The central pub/sub hub.
pub struct Hub {
    /// Channels keyed by org channel (`{org_id}/{channel}`).
    channels: DashMap<String, ChannelEntry>,
    /// Client subscriptions (client_id -> set of org channels).
    subscriptions: DashMap<String, DashSet<String>>,
    config: HubConfig,
}

impl Hub {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HubConfig::default())
    }

    #[must_use]
    pub fn with_config(config: HubConfig) -> Self {
        info!("Creating hub with config: {:?}", config);
        Self {
            channels: DashMap::new(),
            subscriptions: DashMap::new(),
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Get hub statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            channel_count: self.channels.len(),
            connection_count: self.subscriptions.len(),
            total_subscriptions: self.subscriptions.iter().map(|s| s.len()).sum(),
        }
    }

    /// Subscribe a client to a channel.
    ///
    /// The recovered history and the receiver are taken under the same lock,
    /// so replaying `recovered` and then draining the receiver sees every
    /// message exactly once.
    ///
    /// # Errors
    ///
    /// Returns an error if the client is already subscribed or a limit is
    /// reached.
    pub fn subscribe(
        &self,
        org_id: i64,
        channel: &str,
        info: ClientInfo,
        options: SubscribeOptions,
    ) -> Result<Subscription, HubError> {
        let key = org_channel(org_id, channel);
        let client_id = info.client_id.clone();

        // Held until the end so the client's index is only created once the
        // subscription exists.
        let conn_entry = self.subscriptions.entry(client_id.clone());
        let (held, already) = match &conn_entry {
            Entry::Occupied(subs) => (subs.get().len(), subs.get().contains(&key)),
            Entry::Vacant(_) => (0, false),
        };

        if held >= self.config.max_subscriptions_per_connection {
            return Err(HubError::MaxSubscriptionsReached);
        }

        if already {
            return Err(HubError::AlreadySubscribed(channel.to_string()));
        }

        if !self.channels.contains_key(&key) && self.channels.len() >= self.config.max_channels {
            return Err(HubError::MaxChannelsReached);
        }

        let mut entry = self.channels.entry(key.clone()).or_insert_with(|| {
            debug!(channel = %channel, org_id, "Creating new channel");
            ChannelEntry::new(org_id, channel, self.config.channel_capacity)
        });

        if options.presence {
            entry.presence.join(info.clone());
        }
        let receiver = entry.channel.subscribe(info, options.join_leave);
        let recovered = if options.recover {
            entry.channel.history()
        } else {
            Vec::new()
        };
        conn_entry.or_default().insert(key);

        debug!(
            channel = %channel,
            org_id,
            client = %client_id,
            subscribers = entry.channel.subscriber_count(),
            recovered = recovered.len(),
            "Subscribed"
        );

        Ok(Subscription {
            receiver,
            recovered,
        })
    }

    /// Unsubscribe a client from a channel.
    ///
    /// # Errors
    ///
    /// Returns an error if not subscribed.
    pub fn unsubscribe(&self, client_id: &str, org_id: i64, channel: &str) -> Result<(), HubError> {
        let key = org_channel(org_id, channel);

        let removed = self
            .subscriptions
            .get(client_id)
            .is_some_and(|conn_subs| conn_subs.remove(&key).is_some());
        if !removed {
            return Err(HubError::NotSubscribed(channel.to_string()));
        }

        self.leave(client_id, &key);
        Ok(())
    }

    /// Unsubscribe a client from all channels.
    ///
    /// Returns the number of subscriptions removed.
    pub fn unsubscribe_all(&self, client_id: &str) -> usize {
        let Some((_, keys)) = self.subscriptions.remove(client_id) else {
            return 0;
        };

        let count = keys.len();
        for key in keys.iter() {
            self.leave(client_id, &key);
        }

        debug!(client = %client_id, channels = count, "Unsubscribed from all channels");
        count
    }

    fn leave(&self, client_id: &str, key: &str) {
        let Some(mut entry) = self.channels.get_mut(key) else {
            return;
        };

        entry.channel.unsubscribe(client_id);
        entry.presence.leave(client_id);
        let idle = entry.channel.is_idle();
        drop(entry);

        if idle && self.channels.remove_if(key, |_, e| e.channel.is_idle()).is_some() {
            debug!(channel = %key, "Deleted empty channel");
        }
    }

    /// Publish a payload to a channel.
    ///
    /// A channel nobody subscribes to is only created when `retention`
    /// keeps history; otherwise the publish reaches nobody.
    ///
    /// # Errors
    ///
    /// Returns an error if keeping history would exceed the channel limit.
    pub fn publish(
        &self,
        org_id: i64,
        channel: &str,
        data: Bytes,
        retention: Retention,
    ) -> Result<PublishResult, HubError> {
        let key = org_channel(org_id, channel);

        let mut entry = match self.channels.get_mut(&key) {
            Some(entry) => entry,
            None if retention.is_enabled() => {
                if self.channels.len() >= self.config.max_channels {
                    return Err(HubError::MaxChannelsReached);
                }
                self.channels.entry(key).or_insert_with(|| {
                    debug!(channel = %channel, org_id, "Creating channel for history");
                    ChannelEntry::new(org_id, channel, self.config.channel_capacity)
                })
            }
            None => {
                trace!(channel = %channel, org_id, "Publish to channel without subscribers");
                return Ok(PublishResult {
                    offset: None,
                    recipients: 0,
                });
            }
        };

        let (message, recipients) = entry.channel.publish(data, retention);
        Ok(PublishResult {
            offset: Some(message.offset),
            recipients,
        })
    }

    /// Retained history of a channel, oldest first.
    #[must_use]
    pub fn history(&self, org_id: i64, channel: &str) -> Vec<LiveMessage> {
        self.channels
            .get(&org_channel(org_id, channel))
            .map(|e| e.channel.history())
            .unwrap_or_default()
    }

    /// Presence snapshot of a channel.
    #[must_use]
    pub fn presence(&self, org_id: i64, channel: &str) -> Vec<PresenceState> {
        self.channels
            .get(&org_channel(org_id, channel))
            .map(|e| e.presence.snapshot())
            .unwrap_or_default()
    }

    /// Current subscribers of a channel.
    #[must_use]
    pub fn subscribers(&self, org_id: i64, channel: &str) -> Vec<Subscriber> {
        self.channels
            .get(&org_channel(org_id, channel))
            .map(|e| e.channel.subscribers())
            .unwrap_or_default()
    }

    /// Get the subscriber count for a channel.
    #[must_use]
    pub fn subscriber_count(&self, org_id: i64, channel: &str) -> usize {
        self.channels
            .get(&org_channel(org_id, channel))
            .map(|e| e.channel.subscriber_count())
            .unwrap_or(0)
    }

    /// Check if a channel exists.
    #[must_use]
    pub fn channel_exists(&self, org_id: i64, channel: &str) -> bool {
        self.channels.contains_key(&org_channel(org_id, channel))
    }

    /// Expire history and drop channels left with nothing to keep.
    ///
    /// Returns the number of channels removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.channels.len();
        self.channels.retain(|_, entry| {
            entry.channel.prune(now);
            !entry.channel.is_idle()
        });
        let removed = before.saturating_sub(self.channels.len());
        if removed > 0 {
            debug!(removed, "Swept idle channels");
        }
        removed
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelPublisher for Hub {
    fn publish(&self, org_id: i64, channel: &str, data: Bytes) -> Result<usize, HubError> {
        Hub::publish(self, org_id, channel, data, Retention::none()).map(|r| r.recipients)
    }

    fn client_count(&self, org_id: i64, channel: &str) -> usize {
        self.subscriber_count(org_id, channel)
    }
}

/// Hub statistics.
#[derive(Debug, Clone)]
pub struct HubStats {
    /// Number of live channels.
    pub channel_count: usize,
    /// Number of connections holding subscriptions.
    pub connection_count: usize,
    /// Total number of subscriptions.
    pub total_subscriptions: usize,
}
