//! `core/dashboard`: dashboard activity channels.
//!
//! - `uid/{uid}`: anyone in the org may watch a dashboard; presence and
//!   join/leave show who else has it open. Editors may publish, and their
//!   payload is broadcast verbatim.
//! - `gitops`: admin-only feed of every save and delete, for mirrors of the
//!   dashboards kept outside this system. Only the server publishes here.

use crate::handler::{
    CallContext, ChannelHandler, ChannelHandlerFactory, HandlerError, PublishEvent, PublishReply,
    Status, SubscribeEvent, SubscribeReply,
};
use crate::registry::RegistryError;
use crate::user::{OrgRole, SignedInUser};
use async_trait::async_trait;
use std::sync::Arc;

/// Namespace served under the core scope.
pub const NAMESPACE: &str = "dashboard";

enum DashboardPath<'a> {
    Uid(&'a str),
    GitOps,
}

fn parse_path(path: &str) -> Option<DashboardPath<'_>> {
    if path == "gitops" {
        return Some(DashboardPath::GitOps);
    }
    path.strip_prefix("uid/")
        .filter(|uid| !uid.is_empty() && !uid.contains('/'))
        .map(DashboardPath::Uid)
}

/// Handler for all dashboard paths.
#[derive(Debug, Default)]
pub struct DashboardHandler;

#[async_trait]
impl ChannelHandler for DashboardHandler {
    async fn on_subscribe(
        &self,
        _ctx: &CallContext,
        user: &SignedInUser,
        event: SubscribeEvent,
    ) -> Result<(SubscribeReply, Status), HandlerError> {
        match parse_path(&event.path) {
            Some(DashboardPath::Uid(_)) => {
                let reply = SubscribeReply {
                    presence: true,
                    join_leave: true,
                    ..SubscribeReply::default()
                };
                Ok((reply, Status::Ok))
            }
            Some(DashboardPath::GitOps) if user.has_role(OrgRole::Admin) => {
                Ok((SubscribeReply::default(), Status::Ok))
            }
            Some(DashboardPath::GitOps) => Ok((SubscribeReply::default(), Status::Denied)),
            None => Ok((SubscribeReply::default(), Status::NotFound)),
        }
    }

    async fn on_publish(
        &self,
        _ctx: &CallContext,
        user: &SignedInUser,
        event: PublishEvent,
    ) -> Result<(PublishReply, Status), HandlerError> {
        match parse_path(&event.path) {
            Some(DashboardPath::Uid(_)) if user.has_role(OrgRole::Editor) => {
                Ok((PublishReply::forward(), Status::Ok))
            }
            Some(_) => Ok((PublishReply::forward(), Status::Denied)),
            None => Ok((PublishReply::forward(), Status::NotFound)),
        }
    }
}

/// Factory registered for `core/dashboard`.
#[derive(Debug, Default)]
pub struct DashboardFeature {
    handler: Arc<DashboardHandler>,
}

impl DashboardFeature {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChannelHandlerFactory for DashboardFeature {
    fn handler_for_path(&self, _path: &str) -> Result<Arc<dyn ChannelHandler>, RegistryError> {
        Ok(self.handler.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn user(role: OrgRole) -> SignedInUser {
        SignedInUser {
            user_id: 1,
            org_id: 1,
            login: "u".to_string(),
            role,
        }
    }

    async fn subscribe(path: &str, role: OrgRole) -> (SubscribeReply, Status) {
        let event = SubscribeEvent {
            channel: format!("core/dashboard/{path}"),
            path: path.to_string(),
            data: None,
        };
        DashboardHandler
            .on_subscribe(&CallContext::new("c"), &user(role), event)
            .await
            .unwrap()
    }

    async fn publish(path: &str, role: OrgRole) -> Status {
        let event = PublishEvent {
            channel: format!("core/dashboard/{path}"),
            path: path.to_string(),
            data: Bytes::from_static(b"{}"),
        };
        DashboardHandler
            .on_publish(&CallContext::new("c"), &user(role), event)
            .await
            .unwrap()
            .1
    }

    #[tokio::test]
    async fn test_uid_channel_tracks_presence() {
        let (reply, status) = subscribe("uid/abc", OrgRole::Viewer).await;
        assert_eq!(status, Status::Ok);
        assert!(reply.presence && reply.join_leave);
    }

    #[tokio::test]
    async fn test_gitops_is_admin_only() {
        assert_eq!(subscribe("gitops", OrgRole::Editor).await.1, Status::Denied);
        assert_eq!(subscribe("gitops", OrgRole::Admin).await.1, Status::Ok);
        assert_eq!(publish("gitops", OrgRole::Admin).await, Status::Denied);
    }

    #[tokio::test]
    async fn test_publish_needs_editor() {
        assert_eq!(publish("uid/abc", OrgRole::Viewer).await, Status::Denied);
        assert_eq!(publish("uid/abc", OrgRole::Editor).await, Status::Ok);
    }

    #[tokio::test]
    async fn test_unknown_paths() {
        assert_eq!(subscribe("uid/", OrgRole::Admin).await.1, Status::NotFound);
        assert_eq!(subscribe("uid/a/b", OrgRole::Admin).await.1, Status::NotFound);
        assert_eq!(publish("other", OrgRole::Admin).await, Status::NotFound);
    }
}
