//! Outbound API requests.
//!
//! A [`Request`] is immutable once built and owned by the caller until it is
//! handed to the pipeline.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use syncline_protocol::headers;

/// Paths under this prefix never carry the session token.
pub const NO_AUTH_PREFIX: &str = "/no-auth/";

/// An API request relative to the pipeline's base URL.
#[derive(Debug, Clone)]
pub struct Request {
    /// HTTP method.
    pub method: Method,
    /// Path (and query) relative to the base URL, e.g. `/posts?teamId=1`.
    pub path: String,
    /// Optional JSON body.
    pub body: Option<Value>,
    /// Explicit bearer token; `None` means "use the session token".
    pub token: Option<String>,
    /// Per-call timeout.
    pub timeout: Option<Duration>,
}

impl Request {
    /// Create a new request.
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            token: None,
            timeout: None,
        }
    }

    /// Create a GET request.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// Create a POST request with a JSON body.
    #[must_use]
    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    /// Create a PUT request with a JSON body.
    #[must_use]
    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::PUT, path).with_body(body)
    }

    /// Create a DELETE request.
    #[must_use]
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Attach a JSON body.
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Attach a body from any serializable value.
    ///
    /// # Errors
    ///
    /// Returns an error if `body` cannot be represented as JSON.
    pub fn with_json<T: Serialize>(self, body: &T) -> Result<Self, serde_json::Error> {
        Ok(self.with_body(serde_json::to_value(body)?))
    }

    /// Use an explicit bearer token instead of the session token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Set the per-call timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Whether this request targets an unauthenticated endpoint.
    #[must_use]
    pub fn is_no_auth(&self) -> bool {
        self.path.contains(NO_AUTH_PREFIX)
    }
}

/// Identity of the client application, sent on every call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientIdentity {
    /// Host IDE name.
    pub ide_name: String,
    /// Host IDE detail (edition, distribution).
    pub ide_detail: String,
    /// Host IDE version.
    pub ide_version: String,
    /// Plugin version.
    pub plugin_version: String,
    /// Plugin build.
    pub plugin_build: String,
}

impl ClientIdentity {
    /// Standard headers attached to every API call.
    #[must_use]
    pub fn headers(&self) -> HeaderMap {
        let mut map = HeaderMap::new();
        map.insert(ACCEPT, HeaderValue::from_static("application/json"));
        map.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let plugin = if self.plugin_build.is_empty() {
            self.plugin_version.clone()
        } else {
            format!("{}+{}", self.plugin_version, self.plugin_build)
        };
        let pairs = [
            (headers::CLIENT_IDE, self.ide_name.as_str()),
            (headers::CLIENT_IDE_DETAIL, self.ide_detail.as_str()),
            (headers::CLIENT_PLUGIN_VERSION, plugin.as_str()),
            (headers::CLIENT_IDE_VERSION, self.ide_version.as_str()),
        ];
        for (name, value) in pairs {
            if value.is_empty() {
                continue;
            }
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                map.insert(name, value);
            }
        }
        map
    }
}
