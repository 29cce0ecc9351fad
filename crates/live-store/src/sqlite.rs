//! SQLite [`ConfigBackend`] on top of sqlx.

use async_trait::async_trait;
use chrono::DateTime;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use tracing::info;

use crate::backend::ConfigBackend;
use crate::error::StoreError;
use crate::models::LiveChannelConfig;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS live_channel (
    id       INTEGER PRIMARY KEY AUTOINCREMENT,
    org_id   INTEGER NOT NULL,
    version  INTEGER NOT NULL,
    channel  TEXT NOT NULL,
    created  INTEGER NOT NULL,
    config   TEXT NOT NULL,
    secure   TEXT NOT NULL,
    UNIQUE (org_id, channel)
)";

const COLUMNS: &str = "id, org_id, version, channel, created, config, secure";

/// Backend storing one row per channel config in the `live_channel` table.
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    /// Wrap a pool and create the table if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub async fn new(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(SCHEMA).execute(&pool).await?;
        info!("live_channel table ready");
        Ok(Self { pool })
    }

    /// Connect to `url` and create the table if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or schema creation fails.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        // In-memory databases are per connection, so keep exactly one.
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(if url.contains(":memory:") { 1 } else { 5 })
            .connect(url)
            .await?;
        Self::new(pool).await
    }
}

fn from_row(row: &SqliteRow) -> Result<LiveChannelConfig, StoreError> {
    let created_ms: i64 = row.try_get("created")?;
    let created = DateTime::from_timestamp_millis(created_ms)
        .ok_or_else(|| StoreError::Corrupt(format!("created timestamp {created_ms}")))?;
    let config: String = row.try_get("config")?;
    let secure: String = row.try_get("secure")?;

    Ok(LiveChannelConfig {
        id: row.try_get("id")?,
        org_id: row.try_get("org_id")?,
        version: row.try_get("version")?,
        channel: row.try_get("channel")?,
        created,
        config: serde_json::from_str(&config)?,
        secure: serde_json::from_str(&secure)?,
    })
}

#[async_trait]
impl ConfigBackend for SqliteBackend {
    async fn insert(&self, mut config: LiveChannelConfig) -> Result<LiveChannelConfig, StoreError> {
        let result = sqlx::query(
            "INSERT INTO live_channel (org_id, version, channel, created, config, secure)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(config.org_id)
        .bind(config.version)
        .bind(&config.channel)
        .bind(config.created.timestamp_millis())
        .bind(serde_json::to_string(&config.config)?)
        .bind(serde_json::to_string(&config.secure)?)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => {
                config.id = done.last_insert_rowid();
                Ok(config)
            }
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(StoreError::Conflict {
                org_id: config.org_id,
                channel: config.channel,
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, org_id: i64, id: i64) -> Result<Option<LiveChannelConfig>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM live_channel WHERE org_id = ? AND id = ?"
        ))
        .bind(org_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(from_row).transpose()
    }

    async fn find_by_channel(
        &self,
        org_id: i64,
        channel: &str,
    ) -> Result<Option<LiveChannelConfig>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM live_channel WHERE org_id = ? AND channel = ?"
        ))
        .bind(org_id)
        .bind(channel)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(from_row).transpose()
    }

    async fn list(&self, org_id: i64) -> Result<Vec<LiveChannelConfig>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM live_channel WHERE org_id = ? ORDER BY id"
        ))
        .bind(org_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(from_row).collect()
    }

    async fn update_if_version(
        &self,
        config: &LiveChannelConfig,
        expected_version: i64,
    ) -> Result<bool, StoreError> {
        let done = sqlx::query(
            "UPDATE live_channel SET version = ?, config = ?, secure = ?
             WHERE org_id = ? AND id = ? AND version = ?",
        )
        .bind(config.version)
        .bind(serde_json::to_string(&config.config)?)
        .bind(serde_json::to_string(&config.secure)?)
        .bind(config.org_id)
        .bind(config.id)
        .bind(expected_version)
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected() == 1)
    }

    async fn delete(&self, org_id: i64, id: i64) -> Result<bool, StoreError> {
        let done = sqlx::query("DELETE FROM live_channel WHERE org_id = ? AND id = ?")
            .bind(org_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LiveChannelPlainConfig, SealedSecureConfig};
    use chrono::Utc;

    fn row(org_id: i64, channel: &str) -> LiveChannelConfig {
        LiveChannelConfig {
            id: 0,
            org_id,
            version: 1,
            channel: channel.to_string(),
            created: DateTime::from_timestamp_millis(Utc::now().timestamp_millis()).unwrap(),
            config: LiveChannelPlainConfig {
                remote_write_enabled: true,
                remote_write_endpoint: "http://sink".to_string(),
                remote_write_sample_milliseconds: 250,
            },
            secure: SealedSecureConfig::default(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_read_back() {
        let backend = SqliteBackend::connect("sqlite::memory:").await.unwrap();

        let inserted = backend.insert(row(1, "stream/cpu/host")).await.unwrap();
        assert!(inserted.id > 0);

        let fetched = backend.get(1, inserted.id).await.unwrap().unwrap();
        assert_eq!(fetched, inserted);
        assert_eq!(
            backend.find_by_channel(1, "stream/cpu/host").await.unwrap(),
            Some(inserted.clone())
        );
        assert!(backend.get(2, inserted.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unique_org_channel() {
        let backend = SqliteBackend::connect("sqlite::memory:").await.unwrap();

        backend.insert(row(1, "stream/cpu/host")).await.unwrap();
        assert!(matches!(
            backend.insert(row(1, "stream/cpu/host")).await,
            Err(StoreError::Conflict { org_id: 1, .. })
        ));
        backend.insert(row(2, "stream/cpu/host")).await.unwrap();
    }

    #[tokio::test]
    async fn test_conditional_update_and_delete() {
        let backend = SqliteBackend::connect("sqlite::memory:").await.unwrap();
        let mut stored = backend.insert(row(1, "stream/cpu/host")).await.unwrap();

        stored.version = 2;
        stored.config.remote_write_enabled = false;
        assert!(!backend.update_if_version(&stored, 7).await.unwrap());
        assert!(backend.update_if_version(&stored, 1).await.unwrap());
        assert_eq!(backend.get(1, stored.id).await.unwrap(), Some(stored.clone()));

        assert!(backend.delete(1, stored.id).await.unwrap());
        assert!(!backend.delete(1, stored.id).await.unwrap());
        assert!(backend.list(1).await.unwrap().is_empty());
    }
}
