//! Store error types.

use live_protocol::ChannelError;
use thiserror::Error;

use crate::secrets::SecretsError;

/// Errors produced by channel configuration operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No configuration with the requested id in the org.
    #[error("live channel config not found")]
    NotFound,

    /// A configuration for the channel already exists in the org.
    #[error("live channel config already exists for channel {channel} in org {org_id}")]
    Conflict { org_id: i64, channel: String },

    /// The update was based on a stale version.
    #[error("version conflict: expected {expected}, stored {actual}")]
    VersionConflict { expected: i64, actual: i64 },

    /// The channel string is not a valid channel address.
    #[error("invalid channel: {0}")]
    InvalidChannel(#[from] ChannelError),

    /// Sealing or opening secure settings failed.
    #[error("secrets error: {0}")]
    Secrets(#[from] SecretsError),

    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// JSON column could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row holds a value that cannot be represented.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}
