//! Forwarding of published data to a channel's remote-write endpoint.
//!
//! The HTTP client lives outside this crate behind [`RemoteWriter`]. The
//! forwarder looks up the channel config, applies the per-channel sampling
//! window, and decrypts the credentials only for the write itself.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use live_protocol::org_channel;
use secrecy::Secret;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tenvis_live_store::{ConfigStore, StoreError};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// A single remote write.
pub struct RemoteWriteRequest {
    pub endpoint: String,
    pub user: Option<String>,
    pub password: Option<Secret<String>>,
    pub org_id: i64,
    pub channel: String,
    pub data: Bytes,
}

impl fmt::Debug for RemoteWriteRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteWriteRequest")
            .field("endpoint", &self.endpoint)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("org_id", &self.org_id)
            .field("channel", &self.channel)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Failure reported by a [`RemoteWriter`].
#[derive(Debug, Error)]
#[error("Remote write to {endpoint} failed: {reason}")]
pub struct RemoteWriteError {
    pub endpoint: String,
    pub reason: String,
}

/// Client delivering data to a remote-write endpoint.
#[async_trait]
pub trait RemoteWriter: Send + Sync {
    /// Deliver one request.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint could not be reached or refused
    /// the write.
    async fn write(&self, request: RemoteWriteRequest) -> Result<(), RemoteWriteError>;
}

/// Forwarding errors.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Write(#[from] RemoteWriteError),
}

/// What happened to a forward attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// The channel has no stored config.
    NotConfigured,
    /// Remote write is turned off for the channel.
    Disabled,
    /// Suppressed by the sampling window.
    Sampled,
    /// Delivered.
    Sent,
}

/// Per-channel sampling state: the time of the last forwarded write.
///
/// Process-local and best effort; it does not survive a restart.
#[derive(Debug, Default)]
pub struct WriteSampler {
    last_sent: DashMap<String, Instant>,
}

impl WriteSampler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a write slot for `key`.
    ///
    /// Returns `true` if no write happened within `interval`, recording now
    /// as the latest write. A zero interval always succeeds.
    pub fn try_acquire(&self, key: &str, interval: Duration) -> bool {
        if interval.is_zero() {
            return true;
        }

        let now = Instant::now();
        match self.last_sent.entry(key.to_string()) {
            Entry::Occupied(mut last) => {
                if now.duration_since(*last.get()) < interval {
                    return false;
                }
                last.insert(now);
                true
            }
            Entry::Vacant(slot) => {
                slot.insert(now);
                true
            }
        }
    }

    /// Forget a channel, e.g. after its config was deleted.
    pub fn forget(&self, key: &str) {
        self.last_sent.remove(key);
    }
}

/// Forwards published data according to each channel's stored config.
pub struct RemoteWriteForwarder {
    store: Arc<ConfigStore>,
    writer: Arc<dyn RemoteWriter>,
    sampler: WriteSampler,
}

impl RemoteWriteForwarder {
    #[must_use]
    pub fn new(store: Arc<ConfigStore>, writer: Arc<dyn RemoteWriter>) -> Self {
        Self {
            store,
            writer,
            sampler: WriteSampler::new(),
        }
    }

    /// Forward `data` published on `channel` if its config asks for it.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be read or decrypted, or the
    /// write fails.
    pub async fn forward(
        &self,
        org_id: i64,
        channel: &str,
        data: Bytes,
    ) -> Result<ForwardOutcome, ForwardError> {
        let Some(stored) = self.store.find_by_channel(org_id, channel).await? else {
            return Ok(ForwardOutcome::NotConfigured);
        };
        if !stored.config.remote_write_enabled || stored.config.remote_write_endpoint.is_empty() {
            return Ok(ForwardOutcome::Disabled);
        }

        let key = org_channel(org_id, channel);
        if !self
            .sampler
            .try_acquire(&key, stored.config.sample_interval())
        {
            trace!(channel = %channel, org_id, "Remote write sampled out");
            return Ok(ForwardOutcome::Sampled);
        }

        let secure = self.store.decrypt_secure(&stored)?;
        let request = RemoteWriteRequest {
            endpoint: stored.config.remote_write_endpoint,
            user: secure.remote_write_user,
            password: secure.remote_write_password,
            org_id,
            channel: channel.to_string(),
            data,
        };

        debug!(channel = %channel, org_id, endpoint = %request.endpoint, "Remote write");
        self.writer.write(request).await?;
        Ok(ForwardOutcome::Sent)
    }

    /// Forward in the background, logging the outcome.
    pub fn spawn_forward(self: &Arc<Self>, org_id: i64, channel: String, data: Bytes) {
        let forwarder = Arc::clone(self);
        tokio::spawn(async move {
            match forwarder.forward(org_id, &channel, data).await {
                Ok(outcome) => trace!(channel = %channel, org_id, ?outcome, "Forward finished"),
                Err(e) => warn!(channel = %channel, org_id, error = %e, "Remote write failed"),
            }
        });
    }

    /// Drop sampling state for a channel.
    pub fn forget(&self, org_id: i64, channel: &str) {
        self.sampler.forget(&org_channel(org_id, channel));
    }
}
