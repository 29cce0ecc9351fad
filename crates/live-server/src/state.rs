//! Shared server state.

use crate::config::{Config, StorageBackend};
use crate::remote::LoggingRemoteWriter;
use anyhow::{Context, Result};
use std::sync::Arc;
use tenvis_live_core::{
    register_builtin, ChannelPublisher, DashboardActivityNotifier, Dispatcher, HandlerRegistry,
    Hub, RemoteWriteForwarder,
};
use tenvis_live_store::{
    ConfigBackend, ConfigStore, MemoryBackend, SecretsService, SqliteBackend, XChaChaSecrets,
};
use tracing::{info, warn};

/// Everything request handlers share.
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub store: Arc<ConfigStore>,
    pub forwarder: Arc<RemoteWriteForwarder>,
    pub activity: DashboardActivityNotifier,
    pub config: Config,
}

impl AppState {
    /// Build state with the storage and secrets named in `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the secret key is invalid or the database cannot
    /// be opened.
    pub async fn new(config: Config) -> Result<Self> {
        let backend: Arc<dyn ConfigBackend> = match config.storage.backend {
            StorageBackend::Memory => Arc::new(MemoryBackend::new()),
            StorageBackend::Sqlite => Arc::new(
                SqliteBackend::connect(&config.storage.url)
                    .await
                    .with_context(|| format!("Failed to open {}", config.storage.url))?,
            ),
        };

        let secrets: Arc<dyn SecretsService> = match &config.secrets.key {
            Some(key) => Arc::new(XChaChaSecrets::from_base64(key).context("Invalid secret key")?),
            None => {
                warn!("No secret key configured, secure settings will not survive a restart");
                Arc::new(XChaChaSecrets::generate())
            }
        };

        info!(storage = ?config.storage.backend, "Channel config store ready");
        Ok(Self::with_store(config, Arc::new(ConfigStore::new(backend, secrets))))
    }

    /// Build state around an existing store.
    #[must_use]
    pub fn with_store(config: Config, store: Arc<ConfigStore>) -> Self {
        let hub = Arc::new(Hub::with_config(config.limits.hub_config()));
        let registry = Arc::new(
            register_builtin(HandlerRegistry::builder(), config.streams).build(),
        );
        let publisher: Arc<dyn ChannelPublisher> = hub.clone();
        let forwarder = Arc::new(RemoteWriteForwarder::new(
            store.clone(),
            Arc::new(LoggingRemoteWriter),
        ));

        Self {
            dispatcher: Dispatcher::new(registry, hub).with_forwarder(forwarder.clone()),
            store,
            forwarder,
            activity: DashboardActivityNotifier::new(publisher),
            config,
        }
    }

    #[must_use]
    pub fn hub(&self) -> &Arc<Hub> {
        self.dispatcher.hub()
    }
}
