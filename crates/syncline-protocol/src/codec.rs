//! Codec for realtime frames.
//!
//! Realtime messages travel as UTF-8 JSON text frames, one message per frame.

use serde_json::Value;
use thiserror::Error;

use crate::message::RealtimeMessage;

/// Maximum frame size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Frame is not a JSON object with a `type` field.
    #[error("Frame has no message type")]
    MissingType,

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame is not valid UTF-8.
    #[error("Invalid UTF-8 in frame")]
    InvalidUtf8,
}

/// Decode a realtime message from a text frame.
///
/// # Errors
///
/// Returns an error if the frame is too large, is not JSON, or has no `type`.
pub fn decode(frame: &str) -> Result<RealtimeMessage, ProtocolError> {
    if frame.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(frame.len()));
    }

    let value: Value = serde_json::from_str(frame)?;
    if value.get("type").and_then(Value::as_str).is_none() {
        return Err(ProtocolError::MissingType);
    }

    Ok(serde_json::from_value(value)?)
}

/// Decode a realtime message from a binary frame holding UTF-8 JSON.
///
/// # Errors
///
/// Returns an error if the bytes are not UTF-8 or [`decode`] fails.
pub fn decode_bytes(frame: &[u8]) -> Result<RealtimeMessage, ProtocolError> {
    let text = std::str::from_utf8(frame).map_err(|_| ProtocolError::InvalidUtf8)?;
    decode(text)
}

/// Encode a realtime message to a text frame.
///
/// # Errors
///
/// Returns an error if the encoded frame is too large.
pub fn encode(message: &RealtimeMessage) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(message)?;
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }
    Ok(text)
}
