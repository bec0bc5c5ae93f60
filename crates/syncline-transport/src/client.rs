//! HTTP client implementation backed by `reqwest`.

use async_trait::async_trait;
use std::time::Duration;
use tracing::trace;

use crate::traits::{HttpClient, HttpRequest, HttpResponse, TransportError};

/// Default connect timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// `reqwest`-based HTTP client configuration.
#[derive(Debug, Clone)]
pub struct ReqwestConfig {
    /// Connect timeout for new connections.
    pub connect_timeout: Duration,
    /// Accept invalid TLS certificates (self-hosted deployments).
    pub accept_invalid_certs: bool,
    /// Optional `User-Agent` header.
    pub user_agent: Option<String>,
}

impl Default for ReqwestConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            accept_invalid_certs: false,
            user_agent: Some(concat!("syncline/", env!("CARGO_PKG_VERSION")).to_string()),
        }
    }
}

/// HTTP client over a shared `reqwest::Client` connection pool.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    inner: reqwest::Client,
}

impl ReqwestClient {
    /// Create a client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialised.
    pub fn new(config: ReqwestConfig) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .danger_accept_invalid_certs(config.accept_invalid_certs);
        if let Some(agent) = config.user_agent {
            builder = builder.user_agent(agent);
        }
        let inner = builder
            .build()
            .map_err(|e| TransportError::Other(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { inner })
    }

    /// Wrap an existing `reqwest::Client`.
    #[must_use]
    pub fn from_client(inner: reqwest::Client) -> Self {
        Self { inner }
    }
}

fn map_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Request(err.to_string())
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = self
            .inner
            .request(request.method.clone(), &request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(map_error)?;
        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().to_string();
        let body = response.bytes().await.map_err(map_error)?;

        trace!(status = status.as_u16(), url = %url, bytes = body.len(), "HTTP response");

        Ok(HttpResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body,
            url,
        })
    }

    fn name(&self) -> &'static str {
        "reqwest"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Method;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_send_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ping"))
            .and(header("x-probe", "1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-request-id", "abc")
                    .set_body_string("pong"),
            )
            .mount(&server)
            .await;

        let client = ReqwestClient::new(ReqwestConfig::default()).unwrap();
        let mut request = HttpRequest::new(Method::GET, format!("{}/ping", server.uri()));
        request
            .headers
            .insert("x-probe", reqwest::header::HeaderValue::from_static("1"));

        let response = client.send(request).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.request_id(), Some("abc"));
        assert_eq!(&response.body[..], b"pong");
    }

    #[tokio::test]
    async fn test_connect_failure_maps_to_connect_error() {
        let client = ReqwestClient::new(ReqwestConfig::default()).unwrap();
        // Port 9 (discard) on localhost is closed in test environments.
        let request = HttpRequest::new(Method::GET, "http://127.0.0.1:9/");
        match client.send(request).await {
            Err(TransportError::Connect(_)) | Err(TransportError::Request(_)) => {}
            other => panic!("Expected connect error, got {:?}", other),
        }
    }
}
