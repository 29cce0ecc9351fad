//! # live-store
//!
//! Per-organization, per-channel configuration for the Live messaging layer.
//!
//! - **ConfigStore** - create/update/delete/get/list with optimistic versioning
//! - **Secrets** - secure settings are sealed per org before they are stored
//! - **Backends** - in-memory and SQLite row storage behind [`ConfigBackend`]
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │  API / Core  │────▶│ ConfigStore  │────▶│ ConfigBackend│
//! └──────────────┘     └──────────────┘     └──────────────┘
//!                             │
//!                             ▼
//!                      ┌──────────────┐
//!                      │   Secrets    │
//!                      └──────────────┘
//! ```

pub mod backend;
pub mod error;
pub mod memory;
pub mod models;
pub mod secrets;
pub mod sqlite;
pub mod store;

pub use backend::ConfigBackend;
pub use error::StoreError;
pub use memory::MemoryBackend;
pub use models::{
    CreateLiveChannelConfigCommand, DeleteLiveChannelConfigCommand, GetLiveChannelConfigQuery,
    ListLiveChannelConfigQuery, LiveChannelConfig, LiveChannelPlainConfig,
    LiveChannelSecureConfig, SealedSecureConfig, UpdateLiveChannelConfigCommand,
    REMOTE_WRITE_PASSWORD, REMOTE_WRITE_USER,
};
pub use secrets::{SecretsError, SecretsService, XChaChaSecrets};
pub use sqlite::SqliteBackend;
pub use store::ConfigStore;
