//! Shared fixtures for the Syncline benchmarks.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use syncline_core::{
    Dispatcher, DispatcherConfig, EventBus, ResolveError, ResolveOptions, Resolver, ResolverRegistry,
};
use syncline_protocol::{MessageType, RealtimeMessage};

/// Resolver that hands the payload back unchanged.
pub struct PassThrough;

#[async_trait]
impl Resolver for PassThrough {
    async fn resolve(
        &self,
        message: &RealtimeMessage,
        _options: ResolveOptions,
    ) -> Result<Option<Value>, ResolveError> {
        Ok(Some(message.data.clone()))
    }
}

/// A dispatcher resolving posts and users with [`PassThrough`].
///
/// Must be called from within a Tokio runtime.
#[must_use]
pub fn dispatcher(bus: EventBus) -> Dispatcher {
    let registry = Arc::new(ResolverRegistry::new());
    registry.register_all(&[MessageType::Posts, MessageType::Users], Arc::new(PassThrough));
    Dispatcher::new(
        DispatcherConfig {
            self_id: Some("me".into()),
            subscribe: None,
        },
        registry,
        bus,
    )
}

/// A posts message with `count` records.
#[must_use]
pub fn posts(count: usize) -> RealtimeMessage {
    let records: Vec<Value> = (0..count)
        .map(|i| {
            json!({
                "id": format!("p{}", i),
                "streamId": format!("s{}", i % 8),
                "seqNum": i,
                "creatorId": "u2",
                "text": "hello",
            })
        })
        .collect();
    RealtimeMessage::new(MessageType::Posts, Value::Array(records))
}
