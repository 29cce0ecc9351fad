//! In-memory [`ConfigBackend`].

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::backend::ConfigBackend;
use crate::error::StoreError;
use crate::models::LiveChannelConfig;

#[derive(Debug, Default)]
struct Tables {
    last_id: i64,
    rows: BTreeMap<i64, LiveChannelConfig>,
}

/// Process-local backend, mostly for tests and single-node setups.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    tables: RwLock<Tables>,
}

impl MemoryBackend {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigBackend for MemoryBackend {
    async fn insert(&self, mut config: LiveChannelConfig) -> Result<LiveChannelConfig, StoreError> {
        let mut tables = self.tables.write().await;

        let taken = tables
            .rows
            .values()
            .any(|row| row.org_id == config.org_id && row.channel == config.channel);
        if taken {
            return Err(StoreError::Conflict {
                org_id: config.org_id,
                channel: config.channel,
            });
        }

        tables.last_id += 1;
        config.id = tables.last_id;
        tables.rows.insert(config.id, config.clone());
        Ok(config)
    }

    async fn get(&self, org_id: i64, id: i64) -> Result<Option<LiveChannelConfig>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.rows.get(&id).filter(|row| row.org_id == org_id).cloned())
    }

    async fn find_by_channel(
        &self,
        org_id: i64,
        channel: &str,
    ) -> Result<Option<LiveChannelConfig>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .rows
            .values()
            .find(|row| row.org_id == org_id && row.channel == channel)
            .cloned())
    }

    async fn list(&self, org_id: i64) -> Result<Vec<LiveChannelConfig>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .rows
            .values()
            .filter(|row| row.org_id == org_id)
            .cloned()
            .collect())
    }

    async fn update_if_version(
        &self,
        config: &LiveChannelConfig,
        expected_version: i64,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        match tables.rows.get_mut(&config.id) {
            Some(row) if row.org_id == config.org_id && row.version == expected_version => {
                *row = config.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, org_id: i64, id: i64) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        if tables.rows.get(&id).is_some_and(|row| row.org_id == org_id) {
            tables.rows.remove(&id);
            return Ok(true);
        }
        Ok(false)
    }
}
