//! `core/broadcast`: free-form channels between users of an org.
//!
//! Any path is accepted. The last message is kept for ten minutes so late
//! subscribers see the current state.

use crate::handler::{
    CallContext, ChannelHandler, ChannelHandlerFactory, HandlerError, PublishEvent, PublishReply,
    Status, SubscribeEvent, SubscribeReply,
};
use crate::registry::RegistryError;
use crate::user::{OrgRole, SignedInUser};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub const NAMESPACE: &str = "broadcast";

const HISTORY_TTL: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Default)]
pub struct BroadcastHandler;

#[async_trait]
impl ChannelHandler for BroadcastHandler {
    async fn on_subscribe(
        &self,
        _ctx: &CallContext,
        _user: &SignedInUser,
        _event: SubscribeEvent,
    ) -> Result<(SubscribeReply, Status), HandlerError> {
        let reply = SubscribeReply {
            recover: true,
            ..SubscribeReply::default()
        };
        Ok((reply, Status::Ok))
    }

    async fn on_publish(
        &self,
        _ctx: &CallContext,
        user: &SignedInUser,
        event: PublishEvent,
    ) -> Result<(PublishReply, Status), HandlerError> {
        if !user.has_role(OrgRole::Editor) {
            return Ok((PublishReply::forward(), Status::Denied));
        }
        let reply = PublishReply::with_data(event.data).with_history(1, Some(HISTORY_TTL));
        Ok((reply, Status::Ok))
    }
}

/// Factory registered for `core/broadcast`.
#[derive(Debug, Default)]
pub struct BroadcastFeature {
    handler: Arc<BroadcastHandler>,
}

impl BroadcastFeature {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChannelHandlerFactory for BroadcastFeature {
    fn handler_for_path(&self, _path: &str) -> Result<Arc<dyn ChannelHandler>, RegistryError> {
        Ok(self.handler.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::PublishAction;
    use bytes::Bytes;

    fn user(role: OrgRole) -> SignedInUser {
        SignedInUser {
            user_id: 1,
            org_id: 1,
            login: "u".to_string(),
            role,
        }
    }

    fn event() -> PublishEvent {
        PublishEvent {
            channel: "core/broadcast/room".to_string(),
            path: "room".to_string(),
            data: Bytes::from_static(b"hi"),
        }
    }

    #[tokio::test]
    async fn test_editor_publish_keeps_last_message() {
        let (reply, status) = BroadcastHandler
            .on_publish(&CallContext::new("c"), &user(OrgRole::Editor), event())
            .await
            .unwrap();
        assert_eq!(status, Status::Ok);
        assert_eq!(reply.action, PublishAction::Override(Bytes::from_static(b"hi")));
        assert_eq!(reply.history_size, 1);
        assert_eq!(reply.history_ttl, Some(HISTORY_TTL));
    }

    #[tokio::test]
    async fn test_viewer_cannot_publish() {
        let (_, status) = BroadcastHandler
            .on_publish(&CallContext::new("c"), &user(OrgRole::Viewer), event())
            .await
            .unwrap();
        assert_eq!(status, Status::Denied);
    }
}
