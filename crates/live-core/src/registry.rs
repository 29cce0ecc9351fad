//! Channel handler registry.
//!
//! Built once at startup and read-only afterwards, so resolution takes no
//! lock. Factories that build handlers lazily do their own caching.

use crate::handler::{ChannelHandler, ChannelHandlerFactory};
use live_protocol::{ChannelAddress, Scope};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No feature claims the scope and namespace.
    #[error("No handler registered for {scope}/{namespace}")]
    UnknownNamespace { scope: Scope, namespace: String },

    /// The feature claims the namespace but not this path.
    #[error("No handler for path: {0}")]
    UnknownPath(String),
}

/// A handler resolved for one channel.
#[derive(Clone)]
pub struct Resolved {
    pub handler: Arc<dyn ChannelHandler>,
    /// Path passed to the handler: the channel path for namespace
    /// registrations, `namespace/path` for scope-wide ones.
    pub path: String,
}

/// Maps `scope/namespace` to the feature serving it.
#[derive(Default)]
pub struct HandlerRegistry {
    namespaces: HashMap<Scope, HashMap<String, Arc<dyn ChannelHandlerFactory>>>,
    scopes: HashMap<Scope, Arc<dyn ChannelHandlerFactory>>,
}

impl HandlerRegistry {
    #[must_use]
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::default()
    }

    /// Resolve the handler for a parsed channel.
    ///
    /// A namespace registration wins over a scope-wide one.
    ///
    /// # Errors
    ///
    /// Returns an error if no feature claims the channel.
    pub fn resolve(&self, address: &ChannelAddress) -> Result<Resolved, RegistryError> {
        if let Some(factory) = self
            .namespaces
            .get(&address.scope)
            .and_then(|by_ns| by_ns.get(&address.namespace))
        {
            let handler = factory.handler_for_path(&address.path)?;
            return Ok(Resolved {
                handler,
                path: address.path.clone(),
            });
        }

        if let Some(factory) = self.scopes.get(&address.scope) {
            let path = address.namespaced_path();
            let handler = factory.handler_for_path(&path)?;
            return Ok(Resolved { handler, path });
        }

        debug!(channel = %address, "No handler registered");
        Err(RegistryError::UnknownNamespace {
            scope: address.scope,
            namespace: address.namespace.clone(),
        })
    }

    /// Number of registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.namespaces.values().map(HashMap::len).sum::<usize>() + self.scopes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Builder for [`HandlerRegistry`].
#[derive(Default)]
pub struct HandlerRegistryBuilder {
    registry: HandlerRegistry,
}

impl HandlerRegistryBuilder {
    /// Serve `scope/namespace/*` with `factory`.
    #[must_use]
    pub fn namespace(
        mut self,
        scope: Scope,
        namespace: impl Into<String>,
        factory: Arc<dyn ChannelHandlerFactory>,
    ) -> Self {
        self.registry
            .namespaces
            .entry(scope)
            .or_default()
            .insert(namespace.into(), factory);
        self
    }

    /// Serve every namespace of `scope` not registered on its own.
    #[must_use]
    pub fn scope(mut self, scope: Scope, factory: Arc<dyn ChannelHandlerFactory>) -> Self {
        self.registry.scopes.insert(scope, factory);
        self
    }

    #[must_use]
    pub fn build(self) -> HandlerRegistry {
        info!(registrations = self.registry.len(), "Handler registry built");
        self.registry
    }
}
