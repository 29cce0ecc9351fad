//! Managed streams under the `stream` scope.
//!
//! All namespaces share one stateless handler; channel state lives in the
//! hub. Publishers push frames that subscribers can recover from a short
//! history.

use crate::handler::{
    CallContext, ChannelHandler, ChannelHandlerFactory, HandlerError, PublishEvent, PublishReply,
    Status, SubscribeEvent, SubscribeReply,
};
use crate::registry::RegistryError;
use crate::user::{OrgRole, SignedInUser};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// History kept per managed stream channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagedStreamSettings {
    pub history_size: usize,
    #[serde(with = "ttl_secs")]
    pub history_ttl: Option<Duration>,
}

impl Default for ManagedStreamSettings {
    fn default() -> Self {
        Self {
            history_size: 1,
            history_ttl: Some(Duration::from_secs(60)),
        }
    }
}

mod ttl_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    // 0 means no expiry.
    pub fn serialize<S: Serializer>(ttl: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(ttl.map_or(0, |d| d.as_secs()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok((secs > 0).then(|| Duration::from_secs(secs)))
    }
}

/// Handler for every stream namespace.
#[derive(Debug, Default)]
pub struct ManagedStreamHandler {
    settings: ManagedStreamSettings,
}

impl ManagedStreamHandler {
    #[must_use]
    pub fn new(settings: ManagedStreamSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl ChannelHandler for ManagedStreamHandler {
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
        let reply = PublishReply::with_data(event.data)
            .with_history(self.settings.history_size, self.settings.history_ttl);
        Ok((reply, Status::Ok))
    }
}

/// Scope-wide factory for `stream/*`.
///
/// Receives `namespace/path` and hands out the shared handler for any
/// well-formed path.
#[derive(Debug, Default)]
pub struct ManagedStreamFactory {
    handler: Arc<ManagedStreamHandler>,
}

impl ManagedStreamFactory {
    #[must_use]
    pub fn new(settings: ManagedStreamSettings) -> Self {
        Self {
            handler: Arc::new(ManagedStreamHandler::new(settings)),
        }
    }
}

impl ChannelHandlerFactory for ManagedStreamFactory {
    fn handler_for_path(&self, path: &str) -> Result<Arc<dyn ChannelHandler>, RegistryError> {
        match path.split_once('/') {
            Some((ns, _)) if !ns.is_empty() => Ok(self.handler.clone()),
            _ => Err(RegistryError::UnknownPath(path.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::PublishAction;
    use bytes::Bytes;

    fn editor() -> SignedInUser {
        SignedInUser {
            user_id: 1,
            org_id: 1,
            login: "u".to_string(),
            role: OrgRole::Editor,
        }
    }

    #[test]
    fn test_namespaces_share_one_handler() {
        let factory = ManagedStreamFactory::default();
        let first = factory.handler_for_path("ns0/x").unwrap();

        for i in 1..10_000 {
            let handler = factory.handler_for_path(&format!("ns{i}/x")).unwrap();
            assert!(Arc::ptr_eq(&first, &handler));
        }
        // Only the factory and `first` hold the handler.
        assert_eq!(Arc::strong_count(&factory.handler), 2);
    }

    #[test]
    fn test_path_without_namespace_rejected() {
        let factory = ManagedStreamFactory::default();
        assert!(matches!(
            factory.handler_for_path("cpu"),
            Err(RegistryError::UnknownPath(_))
        ));
    }

    #[tokio::test]
    async fn test_publish_uses_configured_history() {
        let settings = ManagedStreamSettings {
            history_size: 5,
            history_ttl: None,
        };
        let handler = ManagedStreamFactory::new(settings)
            .handler_for_path("cpu/host1")
            .unwrap();
        let event = PublishEvent {
            channel: "stream/cpu/host1".to_string(),
            path: "host1".to_string(),
            data: Bytes::from_static(b"42"),
        };

        let (reply, status) = handler
            .on_publish(&CallContext::new("c"), &editor(), event)
            .await
            .unwrap();
        assert_eq!(status, Status::Ok);
        assert_eq!(reply.action, PublishAction::Override(Bytes::from_static(b"42")));
        assert_eq!(reply.history_size, 5);
        assert_eq!(reply.history_ttl, None);
    }

    #[test]
    fn test_settings_from_toml() {
        let settings: ManagedStreamSettings =
            toml::from_str("history_size = 10\nhistory_ttl = 0").unwrap();
        assert_eq!(settings.history_size, 10);
        assert_eq!(settings.history_ttl, None);
    }
}
