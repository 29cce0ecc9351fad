//! Durable storage seam for channel configuration rows.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::LiveChannelConfig;

/// Row-level storage for [`LiveChannelConfig`].
///
/// Implementations enforce `(org_id, channel)` uniqueness and perform the
/// version check of [`update_if_version`](Self::update_if_version) atomically.
#[async_trait]
pub trait ConfigBackend: Send + Sync {
    /// Insert a new row, ignoring `config.id`, and return it with the
    /// assigned id.
    ///
    /// Fails with [`StoreError::Conflict`] if the org already has the channel.
    async fn insert(&self, config: LiveChannelConfig) -> Result<LiveChannelConfig, StoreError>;

    /// Fetch a row by org and id.
    async fn get(&self, org_id: i64, id: i64) -> Result<Option<LiveChannelConfig>, StoreError>;

    /// Fetch a row by org and channel.
    async fn find_by_channel(
        &self,
        org_id: i64,
        channel: &str,
    ) -> Result<Option<LiveChannelConfig>, StoreError>;

    /// All rows of an org, ordered by id.
    async fn list(&self, org_id: i64) -> Result<Vec<LiveChannelConfig>, StoreError>;

    /// Replace the row matching `config.org_id`, `config.id` and
    /// `expected_version` with `config`.
    ///
    /// Returns `false` without writing when no row matches.
    async fn update_if_version(
        &self,
        config: &LiveChannelConfig,
        expected_version: i64,
    ) -> Result<bool, StoreError>;

    /// Delete a row. Returns `false` if it did not exist.
    async fn delete(&self, org_id: i64, id: i64) -> Result<bool, StoreError>;
}
