//! Built-in channel features.

pub mod broadcast;
pub mod dashboard;
pub mod stream;

pub use broadcast::{BroadcastFeature, BroadcastHandler};
pub use dashboard::{DashboardFeature, DashboardHandler};
pub use stream::{ManagedStreamFactory, ManagedStreamHandler, ManagedStreamSettings};

use crate::registry::HandlerRegistryBuilder;
use live_protocol::Scope;
use std::sync::Arc;

/// Register the dashboard, broadcast and managed stream features.
#[must_use]
pub fn register_builtin(
    builder: HandlerRegistryBuilder,
    streams: ManagedStreamSettings,
) -> HandlerRegistryBuilder {
    builder
        .namespace(Scope::Core, dashboard::NAMESPACE, Arc::new(DashboardFeature::new()))
        .namespace(Scope::Core, broadcast::NAMESPACE, Arc::new(BroadcastFeature::new()))
        .scope(Scope::Stream, Arc::new(ManagedStreamFactory::new(streams)))
}
