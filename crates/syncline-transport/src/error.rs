//! API error types.

use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::traits::TransportError;

/// Errors surfaced by the request pipeline.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The network call failed on every attempt.
    #[error("{source} (after {attempts} attempts)")]
    Transport {
        /// Last transport error.
        source: TransportError,
        /// Number of attempts made.
        attempts: u32,
    },

    /// The server answered with a non-2xx status.
    #[error(transparent)]
    Server(#[from] ServerError),

    /// The connectivity probe did not answer within its budget.
    #[error("Could not reach server within {0:?}")]
    ConnectivityTimeout(Duration),

    /// The request URL could not be built.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The response body was not valid JSON.
    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl ApiError {
    /// HTTP status, if the server answered.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Server(e) => Some(e.status),
            _ => None,
        }
    }

    /// The server error, if this is one.
    #[must_use]
    pub fn as_server_error(&self) -> Option<&ServerError> {
        match self {
            ApiError::Server(e) => Some(e),
            _ => None,
        }
    }
}

/// A non-2xx API response.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ServerError {
    /// HTTP status.
    pub status: u16,
    /// Machine-readable error code, e.g. `RAPI-1003`.
    pub code: Option<String>,
    /// Composed human-readable message.
    pub message: String,
    /// Structured error details.
    pub info: Option<Value>,
    /// Server-assigned request id.
    pub request_id: Option<String>,
}

impl ServerError {
    /// Build an error from a status and a (possibly empty) response body.
    ///
    /// Body parsing is best-effort; an unparseable body yields a message made
    /// of the reason phrase alone.
    #[must_use]
    pub fn from_body(status: u16, reason: &str, body: &[u8], request_id: Option<String>) -> Self {
        let data: Option<Value> = serde_json::from_slice(body).ok();
        let field = |name: &str| data.as_ref().and_then(|d| d.get(name)).cloned();

        let code = field("code").and_then(|v| v.as_str().map(str::to_string));
        let server_message = field("message").and_then(|v| v.as_str().map(str::to_string));
        let info = field("info").filter(|v| !v.is_null());

        let mut message = reason.to_string();
        if let Some(code) = &code {
            message.push_str(&format!("({})", code));
        }
        if let Some(text) = &server_message {
            message.push_str(&format!(": {}", text));
        }
        if let Some(info) = &info {
            if let Some(name) = info.get("name").and_then(Value::as_str) {
                message.push('\n');
                message.push_str(name);
            }
            if server_message.as_deref() == Some("Validation error") {
                if let Some(map) = info.as_object() {
                    let joined: Vec<String> = map
                        .values()
                        .map(|v| match v {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        })
                        .collect();
                    message.push(' ');
                    message.push_str(&joined.join(", "));
                }
            }
        }

        Self {
            status,
            code,
            message,
            info,
            request_id,
        }
    }

    /// Whether the status is in the 4xx range.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    /// Whether the status is in the 5xx range.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_composition() {
        let body = br#"{"code":"RAPI-1003","message":"Not found","info":{"name":"stream"}}"#;
        let err = ServerError::from_body(404, "Not Found", body, Some("r1".into()));
        assert_eq!(err.message, "Not Found(RAPI-1003): Not found\nstream");
        assert_eq!(err.code.as_deref(), Some("RAPI-1003"));
        assert!(err.is_client_error());
        assert!(!err.is_server_error());
    }

    #[test]
    fn test_validation_error_joins_info() {
        let body = br#"{"code":"RAPI-1005","message":"Validation error","info":{"email":"is required"}}"#;
        let err = ServerError::from_body(422, "Unprocessable Entity", body, None);
        assert_eq!(
            err.message,
            "Unprocessable Entity(RAPI-1005): Validation error is required"
        );
    }

    #[test]
    fn test_unparseable_body() {
        let err = ServerError::from_body(503, "Service Unavailable", b"<html>", None);
        assert_eq!(err.message, "Service Unavailable");
        assert!(err.code.is_none());
        assert!(err.is_server_error());

        let api: ApiError = err.into();
        assert_eq!(api.status(), Some(503));
    }
}
