//! # tenvis-live-core
//!
//! Channel handlers, dispatch and in-process delivery for Live.
//!
//! - **Registry** - maps `scope/namespace` to the feature that owns it
//! - **Dispatcher** - runs subscribe/publish through the owning handler
//! - **Hub** - per-channel broadcast, presence, join/leave and history
//! - **Remote write** - forwards publications to a channel's configured sink
//! - **Activity** - dashboard save/delete notifications
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Connection │────▶│ Dispatcher  │────▶│   Handler   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            │
//!                            ▼
//!                     ┌─────────────┐     ┌─────────────┐
//!                     │     Hub     │────▶│  Forwarder  │
//!                     └─────────────┘     └─────────────┘
//! ```

pub mod activity;
pub mod channel;
pub mod dispatcher;
pub mod features;
pub mod handler;
pub mod hub;
pub mod message;
pub mod presence;
pub mod registry;
pub mod remote_write;
pub mod user;

pub use activity::{
    ActivityError, Dashboard, DashboardAction, DashboardActivityChannel,
    DashboardActivityNotifier, DashboardEvent, SaveOutcome, UserDisplay,
};
pub use channel::{Channel, Retention, Subscriber};
pub use dispatcher::{DispatchError, Dispatcher, PublishOutcome, SubscribeOutcome};
pub use features::{register_builtin, ManagedStreamSettings};
pub use handler::{
    CallContext, ChannelHandler, ChannelHandlerFactory, HandlerError, PublishAction,
    PublishEvent, PublishReply, Status, SubscribeEvent, SubscribeReply,
};
pub use hub::{
    ChannelPublisher, Hub, HubConfig, HubError, HubStats, PublishResult, SubscribeOptions,
    Subscription,
};
pub use message::{HubEvent, LiveMessage};
pub use presence::{Presence, PresenceState};
pub use registry::{HandlerRegistry, HandlerRegistryBuilder, RegistryError};
pub use remote_write::{
    ForwardError, ForwardOutcome, RemoteWriteError, RemoteWriteForwarder, RemoteWriteRequest,
    RemoteWriter, WriteSampler,
};
pub use user::{OrgRole, SignedInUser, UnknownRole};
