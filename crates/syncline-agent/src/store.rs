//! In-memory entity cache used as the default resolver.
//!
//! Incoming records are shallow-merged over the cached copy by id. A record
//! with a lower `version` than the cached one is stale and ignored.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Map, Value};
use syncline_core::{ResolveError, ResolveOptions, Resolver};
use syncline_protocol::{MessageType, RealtimeMessage};

/// Entity types cached by [`EntityStore`].
pub const ENTITY_TYPES: &[MessageType] = &[
    MessageType::Codemarks,
    MessageType::CodeErrors,
    MessageType::Companies,
    MessageType::Documents,
    MessageType::MarkerLocations,
    MessageType::Markers,
    MessageType::Posts,
    MessageType::Repositories,
    MessageType::Reviews,
    MessageType::Streams,
    MessageType::Teams,
    MessageType::Users,
];

/// Merge-by-id cache of realtime entities.
#[derive(Debug, Default)]
pub struct EntityStore {
    entities: DashMap<(MessageType, String), Value>,
}

impl EntityStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached entity.
    #[must_use]
    pub fn get(&self, message_type: MessageType, id: &str) -> Option<Value> {
        self.entities
            .get(&(message_type, id.to_string()))
            .map(|e| e.value().clone())
    }

    /// Number of cached entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns `None` when the record changed nothing and `only_if_needed`
    /// is set, or when the record is stale.
    fn merge(&self, message_type: MessageType, record: &Value, only_if_needed: bool) -> Option<Value> {
        let Some(id) = record
            .get("id")
            .or_else(|| record.get("_id"))
            .and_then(Value::as_str)
        else {
            return Some(record.clone());
        };
        let Some(incoming) = record.as_object() else {
            return Some(record.clone());
        };

        let key = (message_type, id.to_string());
        let mut entry = self.entities.entry(key).or_insert_with(|| Value::Object(Map::new()));
        let cached = entry.value_mut();

        if let (Some(incoming_version), Some(cached_version)) =
            (version(incoming), cached.as_object().and_then(version))
        {
            if incoming_version < cached_version {
                return None;
            }
        }

        let mut merged = cached.as_object().cloned().unwrap_or_default();
        for (field, value) in incoming {
            merged.insert(field.clone(), value.clone());
        }
        let merged = Value::Object(merged);
        if *cached == merged && only_if_needed {
            return None;
        }
        *cached = merged.clone();
        Some(merged)
    }
}

fn version(record: &Map<String, Value>) -> Option<u64> {
    record.get("version").and_then(Value::as_u64)
}

#[async_trait]
impl Resolver for EntityStore {
    async fn resolve(
        &self,
        message: &RealtimeMessage,
        options: ResolveOptions,
    ) -> Result<Option<Value>, ResolveError> {
        let message_type = message.message_type;
        match &message.data {
            Value::Array(records) => {
                let resolved: Vec<Value> = records
                    .iter()
                    .filter_map(|r| self.merge(message_type, r, options.only_if_needed))
                    .collect();
                Ok((!resolved.is_empty()).then_some(Value::Array(resolved)))
            }
            Value::Object(_) => Ok(self.merge(message_type, &message.data, options.only_if_needed)),
            Value::Null => Ok(None),
            other => Err(ResolveError::new(
                message_type,
                format!("Unexpected payload: {}", other),
            )),
        }
    }

    /// Codemarks carry their markers inline.
    fn dependents(&self, resolved: &RealtimeMessage) -> Vec<RealtimeMessage> {
        if resolved.message_type != MessageType::Codemarks {
            return Vec::new();
        }
        let markers: Vec<Value> = resolved
            .records()
            .into_iter()
            .filter_map(|codemark| codemark.get("markers").and_then(Value::as_array))
            .flatten()
            .cloned()
            .collect();
        if markers.is_empty() {
            return Vec::new();
        }
        vec![RealtimeMessage::new(MessageType::Markers, Value::Array(markers))]
    }
}
