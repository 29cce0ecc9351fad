//! The contract between the dispatcher and feature modules.
//!
//! A feature claims part of the channel namespace through a
//! [`ChannelHandlerFactory`] and decides, per call, whether a subscribe or
//! publish is allowed and how the dispatcher should act on it.

use crate::channel::Retention;
use crate::registry::RegistryError;
use crate::user::SignedInUser;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Error raised by a handler that failed, as opposed to one that refused.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Per-call context handed to handlers.
#[derive(Debug, Clone)]
pub struct CallContext {
    /// Connection issuing the call.
    pub client_id: String,
    /// Cancelled when the caller goes away.
    pub cancel: CancellationToken,
}

impl CallContext {
    #[must_use]
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            cancel: CancellationToken::new(),
        }
    }

    /// Context whose cancellation follows `parent`.
    #[must_use]
    pub fn child_of(client_id: impl Into<String>, parent: &CancellationToken) -> Self {
        Self {
            client_id: client_id.into(),
            cancel: parent.child_token(),
        }
    }
}

/// Outcome category of a handler call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Allowed.
    Ok,
    /// Refused. A normal outcome, not a failure.
    Denied,
    /// The handler does not serve this path.
    NotFound,
}

/// Subscribe request as seen by a handler.
#[derive(Debug, Clone)]
pub struct SubscribeEvent {
    /// Full channel, `scope/namespace/path`.
    pub channel: String,
    /// Path relative to the factory that resolved the handler.
    pub path: String,
    pub data: Option<Bytes>,
}

/// Publish request as seen by a handler.
#[derive(Debug, Clone)]
pub struct PublishEvent {
    pub channel: String,
    pub path: String,
    pub data: Bytes,
}

/// How the subscription should behave once allowed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscribeReply {
    /// Track the subscriber in the channel presence set.
    pub presence: bool,
    /// Broadcast join/leave events for this subscriber.
    pub join_leave: bool,
    /// Replay retained history before live delivery.
    pub recover: bool,
    /// Initial payload delivered to the new subscriber.
    pub data: Option<Bytes>,
}

/// What the dispatcher broadcasts after an allowed publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishAction {
    /// Broadcast the caller's payload as-is.
    Forward,
    /// The handler already published through its own side channel.
    AlreadyPublished,
    /// Broadcast this payload instead of the caller's.
    Override(Bytes),
}

/// Reply to an allowed publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReply {
    pub action: PublishAction,
    /// Messages retained for recovery. `0` keeps no history.
    pub history_size: usize,
    /// How long retained messages stay recoverable. `None` keeps them until
    /// pushed out by size.
    pub history_ttl: Option<Duration>,
}

impl PublishReply {
    /// Broadcast the caller's payload without history.
    #[must_use]
    pub fn forward() -> Self {
        Self::with_action(PublishAction::Forward)
    }

    #[must_use]
    pub fn already_published() -> Self {
        Self::with_action(PublishAction::AlreadyPublished)
    }

    /// Broadcast `data` in place of the caller's payload.
    #[must_use]
    pub fn with_data(data: impl Into<Bytes>) -> Self {
        Self::with_action(PublishAction::Override(data.into()))
    }

    /// Retain up to `size` messages for `ttl`.
    #[must_use]
    pub fn with_history(mut self, size: usize, ttl: Option<Duration>) -> Self {
        self.history_size = size;
        self.history_ttl = ttl;
        self
    }

    /// Retention policy for the history write.
    #[must_use]
    pub fn retention(&self) -> Retention {
        Retention {
            size: self.history_size,
            ttl: self.history_ttl,
        }
    }

    fn with_action(action: PublishAction) -> Self {
        Self {
            action,
            history_size: 0,
            history_ttl: None,
        }
    }
}

/// Authorization and transform logic for a part of the channel namespace.
///
/// Handlers hold no per-subscriber state; everything they need about the
/// call arrives in the context, the user and the event.
#[async_trait]
pub trait ChannelHandler: Send + Sync {
    /// Decide whether `user` may subscribe.
    ///
    /// # Errors
    ///
    /// Returns an error when the handler itself fails. Refusals are
    /// reported through [`Status`].
    async fn on_subscribe(
        &self,
        ctx: &CallContext,
        user: &SignedInUser,
        event: SubscribeEvent,
    ) -> Result<(SubscribeReply, Status), HandlerError>;

    /// Decide whether `user` may publish and what gets broadcast.
    ///
    /// # Errors
    ///
    /// Returns an error when the handler itself fails.
    async fn on_publish(
        &self,
        ctx: &CallContext,
        user: &SignedInUser,
        event: PublishEvent,
    ) -> Result<(PublishReply, Status), HandlerError>;
}

/// Resolves a path to the handler serving it.
///
/// Called on every subscribe and publish, so it must not block.
pub trait ChannelHandlerFactory: Send + Sync {
    /// Handler for `path`, relative to where the factory is registered.
    ///
    /// # Errors
    ///
    /// Returns an error if the factory does not serve `path`.
    fn handler_for_path(&self, path: &str) -> Result<Arc<dyn ChannelHandler>, RegistryError>;
}
