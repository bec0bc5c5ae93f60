//! Transport abstraction traits for Syncline.
//!
//! The request pipeline and the realtime dispatcher never talk to sockets
//! directly. They go through these traits so that any HTTP client or duplex
//! event channel can be plugged in.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::Method;
use serde::de::DeserializeOwned;
use std::time::Duration;
use syncline_protocol::{headers, ProtocolError, RealtimeMessage};
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The request or connection attempt timed out.
    #[error("Timed out")]
    Timeout,

    /// Could not establish a connection (refused, DNS failure, TLS).
    #[error("Connect failed: {0}")]
    Connect(String),

    /// The request failed after the connection was established.
    #[error("Request failed: {0}")]
    Request(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl From<ProtocolError> for TransportError {
    fn from(err: ProtocolError) -> Self {
        TransportError::Protocol(err.to_string())
    }
}

/// An outgoing HTTP request, fully resolved (absolute URL, all headers).
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// HTTP method.
    pub method: Method,
    /// Absolute URL.
    pub url: String,
    /// Request headers.
    pub headers: HeaderMap,
    /// Encoded request body.
    pub body: Option<Bytes>,
    /// Per-call timeout.
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    /// Create a request with no headers or body.
    #[must_use]
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
        }
    }

    /// Set the per-call timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Body as UTF-8 text, if any.
    #[must_use]
    pub fn body_text(&self) -> Option<&str> {
        self.body
            .as_ref()
            .and_then(|b| std::str::from_utf8(b).ok())
    }
}

/// A received HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Numeric status code.
    pub status: u16,
    /// Canonical reason phrase for the status, if known.
    pub reason: String,
    /// Response headers.
    pub headers: HeaderMap,
    /// Raw response body.
    pub body: Bytes,
    /// Final URL (after redirects).
    pub url: String,
}

impl HttpResponse {
    /// Create a response with the given status and body.
    #[must_use]
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        let reason = reqwest::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or_default()
            .to_string();
        Self {
            status,
            reason,
            headers: HeaderMap::new(),
            body: body.into(),
            url: String::new(),
        }
    }

    /// Add a header. Invalid names or values are ignored.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            reqwest::header::HeaderName::from_bytes(name.as_bytes()),
            reqwest::header::HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
        self
    }

    /// Whether the status is in the 2xx range.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..=299).contains(&self.status)
    }

    /// Get a header value as a string.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The server-assigned request id, if present.
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        self.header(headers::REQUEST_ID)
    }

    /// Deserialize the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// A generic HTTP client.
///
/// Implementations perform exactly one network round trip per call; retry,
/// auth and middleware live in the request pipeline.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Send a request and return the raw response.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;

    /// Get the client name (e.g., "reqwest").
    fn name(&self) -> &'static str;
}

/// A duplex realtime channel delivering server-pushed events.
#[async_trait]
pub trait EventSource: Send {
    /// Open the channel.
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Receive the next message.
    ///
    /// Returns `None` if the channel is closed cleanly.
    async fn recv(&mut self) -> Result<Option<RealtimeMessage>, TransportError>;

    /// Close the channel gracefully.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Check if the channel is open.
    fn is_open(&self) -> bool;
}
