//! Persisted channel configuration and the commands that mutate it.

use chrono::{DateTime, Utc};
use secrecy::Secret;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Secure field holding the remote-write user.
pub const REMOTE_WRITE_USER: &str = "remoteWriteUser";

/// Secure field holding the remote-write password or token.
pub const REMOTE_WRITE_PASSWORD: &str = "remoteWritePassword";

fn is_false(v: &bool) -> bool {
    !*v
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

/// Plain (unencrypted) channel settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveChannelPlainConfig {
    /// Forward published data to an external sink.
    #[serde(default, skip_serializing_if = "is_false")]
    pub remote_write_enabled: bool,

    /// Endpoint receiving forwarded data.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub remote_write_endpoint: String,

    /// Minimum time between two forwarded writes for the channel.
    /// `0` forwards every message.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub remote_write_sample_milliseconds: u64,
}

impl LiveChannelPlainConfig {
    /// The remote-write sampling window.
    #[must_use]
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.remote_write_sample_milliseconds)
    }
}

/// Secure channel settings in plaintext.
///
/// Only ever exists on the way into the store (commands) and at the
/// remote-write point of use. `Debug` never prints the password.
#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveChannelSecureConfig {
    /// User for remote write requests.
    #[serde(default)]
    pub remote_write_user: Option<String>,

    /// Password or token for remote write requests.
    #[serde(default)]
    pub remote_write_password: Option<Secret<String>>,
}

impl LiveChannelSecureConfig {
    /// Whether no secure field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.remote_write_user.is_none() && self.remote_write_password.is_none()
    }
}

impl fmt::Debug for LiveChannelSecureConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveChannelSecureConfig")
            .field("remote_write_user", &self.remote_write_user)
            .field(
                "remote_write_password",
                &self.remote_write_password.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Encrypted secure settings: field name to base64 ciphertext.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SealedSecureConfig(BTreeMap<String, String>);

impl SealedSecureConfig {
    /// Ciphertext for a field.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    /// Store ciphertext for a field, replacing any previous value.
    pub fn insert(&mut self, field: impl Into<String>, ciphertext: String) {
        self.0.insert(field.into(), ciphertext);
    }

    /// Names of the fields that hold a value.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Whether no field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SealedSecureConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.fields()).finish()
    }
}

/// Channel configuration as stored.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveChannelConfig {
    /// Store-assigned identifier.
    pub id: i64,
    /// Owning organization.
    pub org_id: i64,
    /// Optimistic concurrency version, starts at 1.
    pub version: i64,
    /// Channel in `scope/namespace/path` form, unique per org.
    pub channel: String,
    /// Creation time, never changes.
    pub created: DateTime<Utc>,
    /// Plain settings.
    pub config: LiveChannelPlainConfig,
    /// Encrypted settings.
    pub secure: SealedSecureConfig,
}

/// Create a channel configuration.
#[derive(Debug, Default)]
pub struct CreateLiveChannelConfigCommand {
    pub org_id: i64,
    pub channel: String,
    pub config: LiveChannelPlainConfig,
    pub secure: LiveChannelSecureConfig,
}

/// Update a channel configuration.
///
/// `version` must match the stored version. `config` replaces the plain
/// settings when present; each secure field that is set replaces its stored
/// counterpart and unset fields are kept.
#[derive(Debug, Default)]
pub struct UpdateLiveChannelConfigCommand {
    pub id: i64,
    pub org_id: i64,
    pub version: i64,
    pub config: Option<LiveChannelPlainConfig>,
    pub secure: Option<LiveChannelSecureConfig>,
}

/// Delete a channel configuration.
#[derive(Debug, Clone, Copy)]
pub struct DeleteLiveChannelConfigCommand {
    pub id: i64,
    pub org_id: i64,
}

/// Fetch one channel configuration.
#[derive(Debug, Clone, Copy)]
pub struct GetLiveChannelConfigQuery {
    pub id: i64,
    pub org_id: i64,
}

/// List the channel configurations of an organization.
#[derive(Debug, Clone, Copy)]
pub struct ListLiveChannelConfigQuery {
    pub org_id: i64,
}
