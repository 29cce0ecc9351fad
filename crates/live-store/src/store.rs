//! Channel configuration service.
//!
//! Applies the create/update/delete rules on top of a [`ConfigBackend`]:
//! channels are validated, versions start at 1 and move by exactly one per
//! update, and secure settings are sealed before they reach the backend.

use chrono::Utc;
use live_protocol::ChannelAddress;
use std::sync::Arc;
use tracing::{debug, info};

use crate::backend::ConfigBackend;
use crate::error::StoreError;
use crate::models::{
    CreateLiveChannelConfigCommand, DeleteLiveChannelConfigCommand, GetLiveChannelConfigQuery,
    ListLiveChannelConfigQuery, LiveChannelConfig, LiveChannelSecureConfig, SealedSecureConfig,
    UpdateLiveChannelConfigCommand,
};
use crate::secrets::{self, SecretsService};

/// Per-organization, per-channel configuration store.
pub struct ConfigStore {
    backend: Arc<dyn ConfigBackend>,
    secrets: Arc<dyn SecretsService>,
}

impl ConfigStore {
    /// Create a store over a backend and a secrets service.
    #[must_use]
    pub fn new(backend: Arc<dyn ConfigBackend>, secrets: Arc<dyn SecretsService>) -> Self {
        Self { backend, secrets }
    }

    /// Create a channel configuration with version 1.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidChannel`] for a malformed channel,
    /// [`StoreError::Conflict`] if the org already configures the channel.
    pub async fn create(
        &self,
        cmd: CreateLiveChannelConfigCommand,
    ) -> Result<LiveChannelConfig, StoreError> {
        ChannelAddress::parse(&cmd.channel)?;

        let mut sealed = SealedSecureConfig::default();
        secrets::seal(self.secrets.as_ref(), cmd.org_id, &cmd.secure, &mut sealed)?;

        let created = self
            .backend
            .insert(LiveChannelConfig {
                id: 0,
                org_id: cmd.org_id,
                version: 1,
                channel: cmd.channel,
                created: Utc::now(),
                config: cmd.config,
                secure: sealed,
            })
            .await?;

        info!(
            org_id = created.org_id,
            id = created.id,
            channel = %created.channel,
            "Created live channel config"
        );
        Ok(created)
    }

    /// Apply an update if `cmd.version` matches the stored version.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if there is no such row,
    /// [`StoreError::VersionConflict`] if the version is stale; nothing is
    /// written in either case.
    pub async fn update(
        &self,
        cmd: UpdateLiveChannelConfigCommand,
    ) -> Result<LiveChannelConfig, StoreError> {
        let current = self
            .backend
            .get(cmd.org_id, cmd.id)
            .await?
            .ok_or(StoreError::NotFound)?;

        if current.version != cmd.version {
            return Err(StoreError::VersionConflict {
                expected: cmd.version,
                actual: current.version,
            });
        }

        let mut next = current.clone();
        next.version = current.version + 1;
        if let Some(config) = cmd.config {
            next.config = config;
        }
        if let Some(secure) = &cmd.secure {
            secrets::seal(self.secrets.as_ref(), cmd.org_id, secure, &mut next.secure)?;
        }

        if !self.backend.update_if_version(&next, cmd.version).await? {
            // Lost a race with another writer between the read and the write.
            return match self.backend.get(cmd.org_id, cmd.id).await? {
                Some(row) => Err(StoreError::VersionConflict {
                    expected: cmd.version,
                    actual: row.version,
                }),
                None => Err(StoreError::NotFound),
            };
        }

        debug!(
            org_id = next.org_id,
            id = next.id,
            version = next.version,
            "Updated live channel config"
        );
        Ok(next)
    }

    /// Delete a channel configuration.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if it does not exist, including on a repeated
    /// delete.
    pub async fn delete(&self, cmd: DeleteLiveChannelConfigCommand) -> Result<(), StoreError> {
        if !self.backend.delete(cmd.org_id, cmd.id).await? {
            return Err(StoreError::NotFound);
        }
        info!(org_id = cmd.org_id, id = cmd.id, "Deleted live channel config");
        Ok(())
    }

    /// Fetch one configuration of an org.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if it does not exist in that org.
    pub async fn get(&self, query: GetLiveChannelConfigQuery) -> Result<LiveChannelConfig, StoreError> {
        self.backend
            .get(query.org_id, query.id)
            .await?
            .ok_or(StoreError::NotFound)
    }

    /// List all configurations of an org.
    ///
    /// # Errors
    ///
    /// Returns backend errors.
    pub async fn list(
        &self,
        query: ListLiveChannelConfigQuery,
    ) -> Result<Vec<LiveChannelConfig>, StoreError> {
        self.backend.list(query.org_id).await
    }

    /// Look up the configuration of a channel, if any.
    ///
    /// # Errors
    ///
    /// Returns backend errors.
    pub async fn find_by_channel(
        &self,
        org_id: i64,
        channel: &str,
    ) -> Result<Option<LiveChannelConfig>, StoreError> {
        self.backend.find_by_channel(org_id, channel).await
    }

    /// Decrypt the secure settings of a configuration for immediate use.
    ///
    /// # Errors
    ///
    /// Returns an error if a sealed field cannot be opened.
    pub fn decrypt_secure(
        &self,
        config: &LiveChannelConfig,
    ) -> Result<LiveChannelSecureConfig, StoreError> {
        Ok(secrets::open(
            self.secrets.as_ref(),
            config.org_id,
            &config.secure,
        )?)
    }
}
