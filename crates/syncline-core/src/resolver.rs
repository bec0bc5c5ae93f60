//! Per-type resolvers.
//!
//! A [`Resolver`] reconciles a raw realtime payload against local cached
//! state. The dispatcher looks resolvers up by [`MessageType`] in a
//! [`ResolverRegistry`] built at startup; adding a type means registering a
//! resolver.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use syncline_protocol::{MessageType, RealtimeMessage};
use thiserror::Error;
use tracing::debug;

/// Resolver failure.
#[derive(Debug, Clone, Error)]
#[error("Failed to resolve {message_type}: {reason}")]
pub struct ResolveError {
    /// Type of the message being resolved.
    pub message_type: MessageType,
    /// What went wrong.
    pub reason: String,
}

impl ResolveError {
    /// Create a resolve error.
    #[must_use]
    pub fn new(message_type: MessageType, reason: impl Into<String>) -> Self {
        Self {
            message_type,
            reason: reason.into(),
        }
    }
}

/// Hints passed to [`Resolver::resolve`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveOptions {
    /// The resolver may skip a full refetch when local state is already
    /// current. Its exact meaning is defined by each resolver.
    pub only_if_needed: bool,
}

impl ResolveOptions {
    /// Options for a full resolution.
    #[must_use]
    pub fn full() -> Self {
        Self {
            only_if_needed: false,
        }
    }

    /// Options allowing the resolver to skip unneeded work.
    #[must_use]
    pub fn if_needed() -> Self {
        Self {
            only_if_needed: true,
        }
    }
}

/// Reconciles realtime payloads with local state.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resolve a message.
    ///
    /// Returns `Ok(None)` (or an empty payload) when there is nothing to
    /// deliver; the dispatcher then drops the message.
    ///
    /// # Errors
    ///
    /// Returns an error if reconciliation fails.
    async fn resolve(
        &self,
        message: &RealtimeMessage,
        options: ResolveOptions,
    ) -> Result<Option<Value>, ResolveError>;

    /// Nested entities carried by a resolved payload.
    ///
    /// Each returned message is resolved and emitted before the primary one.
    fn dependents(&self, _resolved: &RealtimeMessage) -> Vec<RealtimeMessage> {
        Vec::new()
    }
}

/// Resolvers indexed by message type.
#[derive(Default)]
pub struct ResolverRegistry {
    resolvers: DashMap<MessageType, Arc<dyn Resolver>>,
}

impl ResolverRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resolver, replacing any previous one for the type.
    pub fn register(&self, message_type: MessageType, resolver: Arc<dyn Resolver>) {
        debug!(message_type = %message_type, "Resolver registered");
        self.resolvers.insert(message_type, resolver);
    }

    /// Register one resolver for several types.
    pub fn register_all(&self, types: &[MessageType], resolver: Arc<dyn Resolver>) {
        for ty in types {
            self.register(*ty, resolver.clone());
        }
    }

    /// Look up the resolver for a type.
    #[must_use]
    pub fn get(&self, message_type: MessageType) -> Option<Arc<dyn Resolver>> {
        self.resolvers.get(&message_type).map(|r| r.value().clone())
    }

    /// Number of registered types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    /// Check if no resolver is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }
}
