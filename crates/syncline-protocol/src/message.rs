//! Realtime message types.
//!
//! A realtime message describes a change to a remote entity collection or a
//! control signal (echo, connection). Each message is consumed exactly once by
//! the dispatcher.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Realtime message type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    #[serde(rename = "codemarks")]
    Codemarks,
    #[serde(rename = "codeErrors")]
    CodeErrors,
    #[serde(rename = "companies")]
    Companies,
    #[serde(rename = "connection")]
    Connection,
    #[serde(rename = "documents")]
    Documents,
    #[serde(rename = "echo")]
    Echo,
    #[serde(rename = "markerLocations")]
    MarkerLocations,
    #[serde(rename = "markers")]
    Markers,
    #[serde(rename = "posts")]
    Posts,
    #[serde(rename = "preferences")]
    Preferences,
    #[serde(rename = "repos")]
    Repositories,
    #[serde(rename = "reviews")]
    Reviews,
    #[serde(rename = "streams")]
    Streams,
    #[serde(rename = "teams")]
    Teams,
    #[serde(rename = "unreads")]
    Unreads,
    #[serde(rename = "users")]
    Users,
    /// Any type this client does not understand.
    #[serde(other)]
    Unknown,
}

impl MessageType {
    /// The wire name of this type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Codemarks => "codemarks",
            MessageType::CodeErrors => "codeErrors",
            MessageType::Companies => "companies",
            MessageType::Connection => "connection",
            MessageType::Documents => "documents",
            MessageType::Echo => "echo",
            MessageType::MarkerLocations => "markerLocations",
            MessageType::Markers => "markers",
            MessageType::Posts => "posts",
            MessageType::Preferences => "preferences",
            MessageType::Repositories => "repos",
            MessageType::Reviews => "reviews",
            MessageType::Streams => "streams",
            MessageType::Teams => "teams",
            MessageType::Unreads => "unreads",
            MessageType::Users => "users",
            MessageType::Unknown => "unknown",
        }
    }

    /// Control messages carry no entity payload and are never resolved.
    #[must_use]
    pub fn is_control(&self) -> bool {
        matches!(self, MessageType::Echo | MessageType::Connection)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event pushed from the realtime channel.
///
/// Wire shape: `{type: string, data: any, blockUntilProcessed?: bool}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeMessage {
    /// Message type.
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// Raw (or, after dispatch, resolved) payload.
    #[serde(default)]
    pub data: Value,
    /// Require exclusive processing relative to every other message.
    #[serde(
        rename = "blockUntilProcessed",
        default,
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub block_until_processed: bool,
}

impl RealtimeMessage {
    /// Create a new non-blocking message.
    #[must_use]
    pub fn new(message_type: MessageType, data: Value) -> Self {
        Self {
            message_type,
            data,
            block_until_processed: false,
        }
    }

    /// Create an echo heartbeat message.
    #[must_use]
    pub fn echo() -> Self {
        Self::new(MessageType::Echo, Value::Null)
    }

    /// Mark this message as blocking.
    #[must_use]
    pub fn blocking(mut self) -> Self {
        self.block_until_processed = true;
        self
    }

    /// Replace the payload.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Entity records carried by this message.
    ///
    /// Batches arrive as arrays; a bare object is treated as a batch of one.
    #[must_use]
    pub fn records(&self) -> Vec<&Value> {
        match &self.data {
            Value::Array(items) => items.iter().collect(),
            Value::Null => Vec::new(),
            other => vec![other],
        }
    }

    /// Check if the payload is empty (null, empty array or empty object).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        is_empty_payload(&self.data)
    }
}

/// A payload counts as empty when it is null or an empty collection.
#[must_use]
pub fn is_empty_payload(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}
