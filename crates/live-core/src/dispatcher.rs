//! Subscribe/publish dispatcher.
//!
//! Resolves the handler for a channel, runs it under the caller's
//! cancellation token, and turns its reply into hub operations.

use crate::handler::{
    CallContext, HandlerError, PublishAction, PublishEvent, PublishReply, Status, SubscribeEvent,
    SubscribeReply,
};
use crate::hub::{Hub, HubError, SubscribeOptions, Subscription};
use crate::registry::{HandlerRegistry, RegistryError};
use crate::remote_write::RemoteWriteForwarder;
use crate::user::SignedInUser;
use bytes::Bytes;
use live_protocol::{ChannelAddress, ChannelError, ClientInfo};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};

/// Dispatch errors. Refusals are not errors; see [`SubscribeOutcome`] and
/// [`PublishOutcome`].
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Invalid channel: {0}")]
    InvalidChannel(#[from] ChannelError),

    /// No feature claims the channel.
    #[error(transparent)]
    Resolution(#[from] RegistryError),

    /// The handler failed. Carries the handler's own error.
    #[error("{0}")]
    Handler(HandlerError),

    #[error("Cancelled")]
    Cancelled,

    #[error(transparent)]
    Hub(#[from] HubError),
}

/// Result of a subscribe call.
#[derive(Debug)]
pub enum SubscribeOutcome {
    Subscribed {
        reply: SubscribeReply,
        subscription: Subscription,
    },
    Rejected(Status),
}

/// Result of a publish call.
#[derive(Debug)]
pub enum PublishOutcome {
    Published {
        reply: PublishReply,
        /// Offset of the broadcast message, if one was broadcast.
        offset: Option<u64>,
        recipients: usize,
    },
    Rejected(Status),
}

/// Orchestrates handler calls and hub operations.
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    hub: Arc<Hub>,
    forwarder: Option<Arc<RemoteWriteForwarder>>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(registry: Arc<HandlerRegistry>, hub: Arc<Hub>) -> Self {
        Self {
            registry,
            hub,
            forwarder: None,
        }
    }

    /// Forward broadcast payloads to remote-write endpoints.
    #[must_use]
    pub fn with_forwarder(mut self, forwarder: Arc<RemoteWriteForwarder>) -> Self {
        self.forwarder = Some(forwarder);
        self
    }

    #[must_use]
    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Subscribe the caller to `channel`.
    ///
    /// Nothing is registered unless the handler allows the subscription and
    /// the call was not cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel is invalid or unclaimed, the handler
    /// fails, the call is cancelled, or the hub refuses the subscription.
    pub async fn subscribe(
        &self,
        ctx: &CallContext,
        user: &SignedInUser,
        channel: &str,
        data: Option<Bytes>,
    ) -> Result<SubscribeOutcome, DispatchError> {
        let address = ChannelAddress::parse(channel)?;
        let resolved = self.registry.resolve(&address)?;

        let event = SubscribeEvent {
            channel: channel.to_string(),
            path: resolved.path,
            data,
        };
        let (reply, status) =
            cancellable(ctx, resolved.handler.on_subscribe(ctx, user, event)).await?;

        if status != Status::Ok {
            debug!(channel = %channel, user = user.user_id, ?status, "Subscribe rejected");
            return Ok(SubscribeOutcome::Rejected(status));
        }

        let info = ClientInfo {
            client_id: ctx.client_id.clone(),
            user_id: user.user_id,
            login: user.login.clone(),
        };
        let options = SubscribeOptions {
            presence: reply.presence,
            join_leave: reply.join_leave,
            recover: reply.recover,
        };
        let subscription = self.hub.subscribe(user.org_id, channel, info, options)?;

        Ok(SubscribeOutcome::Subscribed {
            reply,
            subscription,
        })
    }

    /// Publish `data` to `channel` on behalf of the caller.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel is invalid or unclaimed, the handler
    /// fails, the call is cancelled, or the hub refuses the publish.
    pub async fn publish(
        &self,
        ctx: &CallContext,
        user: &SignedInUser,
        channel: &str,
        data: Bytes,
    ) -> Result<PublishOutcome, DispatchError> {
        let address = ChannelAddress::parse(channel)?;
        let resolved = self.registry.resolve(&address)?;

        let event = PublishEvent {
            channel: channel.to_string(),
            path: resolved.path,
            data: data.clone(),
        };
        let (reply, status) =
            cancellable(ctx, resolved.handler.on_publish(ctx, user, event)).await?;

        if status != Status::Ok {
            debug!(channel = %channel, user = user.user_id, ?status, "Publish rejected");
            return Ok(PublishOutcome::Rejected(status));
        }

        let payload = match &reply.action {
            PublishAction::Forward => data,
            PublishAction::Override(replacement) => replacement.clone(),
            PublishAction::AlreadyPublished => {
                trace!(channel = %channel, "Handler published on its own");
                return Ok(PublishOutcome::Published {
                    reply,
                    offset: None,
                    recipients: 0,
                });
            }
        };

        let result = self
            .hub
            .publish(user.org_id, channel, payload.clone(), reply.retention())?;

        if let Some(forwarder) = &self.forwarder {
            forwarder.spawn_forward(user.org_id, channel.to_string(), payload);
        }

        Ok(PublishOutcome::Published {
            reply,
            offset: result.offset,
            recipients: result.recipients,
        })
    }

    /// Drop one subscription.
    ///
    /// # Errors
    ///
    /// Returns an error if the client was not subscribed.
    pub fn unsubscribe(
        &self,
        client_id: &str,
        org_id: i64,
        channel: &str,
    ) -> Result<(), DispatchError> {
        Ok(self.hub.unsubscribe(client_id, org_id, channel)?)
    }

    /// Drop every subscription of a disconnected client.
    pub fn disconnect(&self, client_id: &str) -> usize {
        self.hub.unsubscribe_all(client_id)
    }
}

/// Run a handler call unless the caller cancels first.
async fn cancellable<T>(
    ctx: &CallContext,
    call: impl Future<Output = Result<T, HandlerError>>,
) -> Result<T, DispatchError> {
    tokio::select! {
        biased;
        () = ctx.cancel.cancelled() => Err(DispatchError::Cancelled),
        result = call => result.map_err(DispatchError::Handler),
    }
}
