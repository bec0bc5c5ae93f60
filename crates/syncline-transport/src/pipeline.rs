//! The request pipeline.
//!
//! Every outbound API call goes through [`RequestPipeline::execute`], which
//! handles:
//!
//! - Bearer token injection (skipped for `/no-auth/` paths)
//! - Client identity headers
//! - The middleware chain (`on_request`, `on_provide_response`, `on_response`)
//! - Linear-backoff retry of transport failures and non-4xx error statuses
//! - Error mapping to [`ApiError`] with a breadcrumb and report
//! - Response normalisation
//! - One sanitised log line per call

use bytes::Bytes;
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{ApiError, ServerError};
use crate::middleware::{Middleware, MiddlewareChain, MiddlewareContext, MiddlewareHandle};
use crate::names;
use crate::recorder::RequestRecorder;
use crate::reporter::{Breadcrumb, ErrorReporter, ReportLevel, ReportMessage, TracingReporter};
use crate::request::{ClientIdentity, Request};
use crate::retry::{is_retryable_status, RetryPolicy};
use crate::sanitize::{normalize_response, sanitize_body, sanitize_url};
use crate::traits::{HttpClient, HttpRequest, HttpResponse, TransportError};

/// Path of the unauthenticated capabilities endpoint.
pub const CAPABILITIES_PATH: &str = "/no-auth/capabilities";

/// Default budget for [`RequestPipeline::verify_connectivity`].
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Transport error signatures that are expected while offline.
const QUIET_SIGNATURES: &[&str] = &[
    "connection refused",
    "econnrefused",
    "dns error",
    "failed to lookup address",
    "enotfound",
];

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// API base URL, e.g. `https://api.example.com`.
    pub base_url: String,
    /// Retry policy for network calls.
    pub retry: RetryPolicy,
    /// Client identity sent on every call.
    pub identity: ClientIdentity,
    /// Budget for the connectivity probe.
    pub probe_timeout: Duration,
    /// Directory for request dumps; disabled when `None`.
    pub record_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:12079".to_string(),
            retry: RetryPolicy::default(),
            identity: ClientIdentity::default(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            record_dir: None,
        }
    }
}

/// Server deployment facts returned by the capabilities endpoint.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCapabilities {
    /// Named capabilities the server supports.
    #[serde(default)]
    pub capabilities: Map<String, Value>,
    /// Self-hosted deployment.
    #[serde(default)]
    pub is_on_prem: bool,
    /// Deployment environment name.
    #[serde(default)]
    pub environment: Option<String>,
    /// Production cloud deployment.
    #[serde(default)]
    pub is_production_cloud: bool,
}

impl ServerCapabilities {
    /// Whether the server sends echo heartbeats.
    #[must_use]
    pub fn echoes_enabled(&self) -> bool {
        match self.capabilities.get("echoes") {
            None | Some(Value::Null) | Some(Value::Bool(false)) => false,
            Some(_) => true,
        }
    }
}

/// Executes API calls with auth, middleware and retry.
pub struct RequestPipeline {
    base_url: String,
    client: Arc<dyn HttpClient>,
    retry: RetryPolicy,
    identity_headers: HeaderMap,
    probe_timeout: Duration,
    token: RwLock<Option<String>>,
    middleware: MiddlewareChain,
    reporter: Arc<dyn ErrorReporter>,
    recorder: Option<RequestRecorder>,
    next_call_id: AtomicU64,
}

impl RequestPipeline {
    /// Create a pipeline over an HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidUrl`] if the base URL does not parse.
    pub fn new(config: PipelineConfig, client: Arc<dyn HttpClient>) -> Result<Self, ApiError> {
        url::Url::parse(&config.base_url)
            .map_err(|e| ApiError::InvalidUrl(format!("{}: {}", config.base_url, e)))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
            retry: config.retry,
            identity_headers: config.identity.headers(),
            probe_timeout: config.probe_timeout,
            token: RwLock::new(None),
            middleware: MiddlewareChain::new(),
            reporter: Arc::new(TracingReporter),
            recorder: config.record_dir.map(RequestRecorder::new),
            next_call_id: AtomicU64::new(1),
        })
    }

    /// Replace the error reporter.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// API base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Set the session bearer token.
    pub fn set_token(&self, token: impl Into<String>) {
        *self.token.write() = Some(token.into());
    }

    /// Clear the session bearer token.
    pub fn clear_token(&self) {
        *self.token.write() = None;
    }

    /// Current session bearer token.
    #[must_use]
    pub fn token(&self) -> Option<String> {
        self.token.read().clone()
    }

    /// Register a middleware at the end of the chain.
    pub fn use_middleware(&self, middleware: Arc<dyn Middleware>) -> MiddlewareHandle {
        self.middleware.register(middleware)
    }

    /// Number of registered middleware.
    #[must_use]
    pub fn middleware_count(&self) -> usize {
        self.middleware.len()
    }

    /// GET `path`.
    ///
    /// # Errors
    ///
    /// See [`RequestPipeline::execute`].
    pub async fn get(&self, path: &str) -> Result<Value, ApiError> {
        self.execute(Request::get(path)).await
    }

    /// POST `body` to `path`.
    ///
    /// # Errors
    ///
    /// See [`RequestPipeline::execute`].
    pub async fn post(&self, path: &str, body: Value) -> Result<Value, ApiError> {
        self.execute(Request::post(path, body)).await
    }

    /// PUT `body` to `path`.
    ///
    /// # Errors
    ///
    /// See [`RequestPipeline::execute`].
    pub async fn put(&self, path: &str, body: Value) -> Result<Value, ApiError> {
        self.execute(Request::put(path, body)).await
    }

    /// DELETE `path`.
    ///
    /// # Errors
    ///
    /// See [`RequestPipeline::execute`].
    pub async fn delete(&self, path: &str) -> Result<Value, ApiError> {
        self.execute(Request::delete(path)).await
    }

    /// Execute an API call.
    ///
    /// Returns the normalised JSON body (`Null` for an empty body).
    ///
    /// # Errors
    ///
    /// - [`ApiError::Server`] for a non-2xx final status
    /// - [`ApiError::Transport`] when every attempt failed to get a response
    /// - [`ApiError::Decode`] when a 2xx body is not JSON
    pub async fn execute(&self, request: Request) -> Result<Value, ApiError> {
        let started = Instant::now();
        let call_id = self.next_call_id.fetch_add(1, Ordering::Relaxed);
        let url = format!("{}{}", self.base_url, request.path);
        let sanitized_url = sanitize_url(&url);
        let method = request.method.clone();

        let http = self.build_http_request(&request, url)?;
        let logged_body = http.body_text().map(sanitize_body);

        let mut context = MiddlewareContext::new(http);
        let chain = self.middleware.snapshot();

        for mw in &chain {
            if let Err(e) = mw.on_request(&mut context).await {
                warn!(
                    middleware = %mw.name(),
                    method = %method,
                    url = %sanitized_url,
                    error = %e,
                    "Middleware on_request failed"
                );
            }
        }

        let mut provided = None;
        for mw in &chain {
            match mw.on_provide_response(&context).await {
                Ok(Some(value)) => {
                    debug!(middleware = %mw.name(), url = %sanitized_url, "Response provided by middleware");
                    provided = Some(value);
                    break;
                }
                Ok(None) => {}
                Err(e) => warn!(
                    middleware = %mw.name(),
                    method = %method,
                    url = %sanitized_url,
                    error = %e,
                    "Middleware on_provide_response failed"
                ),
            }
        }

        let mut attempts = 0;
        let result = match provided {
            Some(value) => Ok(value),
            None => {
                let (sent, made) = self.send_with_retry(&context.request, &sanitized_url).await;
                attempts = made;
                match sent {
                    Ok(response) => {
                        let decoded = decode_body(&response);
                        context.response = Some(response);
                        decoded
                    }
                    Err(source) => Err(ApiError::Transport { source, attempts }),
                }
            }
        };

        let body = result.as_ref().ok();
        for mw in &chain {
            if let Err(e) = mw.on_response(&context, body).await {
                warn!(
                    middleware = %mw.name(),
                    method = %method,
                    url = %sanitized_url,
                    error = %e,
                    "Middleware on_response failed"
                );
            }
        }

        let request_id = context
            .response
            .as_ref()
            .and_then(HttpResponse::request_id)
            .map(str::to_string);
        let elapsed = started.elapsed();

        let outcome = match (&result, &context.response) {
            (Ok(_), _) => "success",
            (Err(ApiError::Transport { .. }), _) => "transport_error",
            (Err(_), Some(r)) if !r.is_success() => "server_error",
            (Err(_), _) => "decode_error",
        };
        metrics::counter!(names::API_REQUESTS_TOTAL, "method" => method.to_string(), "outcome" => outcome)
            .increment(1);
        metrics::histogram!(names::API_REQUEST_DURATION, "method" => method.to_string())
            .record(elapsed.as_secs_f64());

        let result = match (result, &context.response) {
            (Err(_), Some(response)) if !response.is_success() => {
                Err(self.server_failure(call_id, &method, &sanitized_url, response, attempts))
            }
            (other, _) => other,
        };

        let request_id = request_id.as_deref().unwrap_or("-");
        let body_suffix = logged_body.map(|b| format!(" body={}", b)).unwrap_or_default();
        match &result {
            Ok(_) => info!(
                call = call_id,
                request_id = %request_id,
                attempts,
                elapsed_ms = elapsed.as_millis() as u64,
                "API: Completed {} {}{}",
                method,
                sanitized_url,
                body_suffix
            ),
            Err(e) => info!(
                call = call_id,
                request_id = %request_id,
                attempts,
                elapsed_ms = elapsed.as_millis() as u64,
                error = %e,
                "API: FAILED {} {}{}",
                method,
                sanitized_url,
                body_suffix
            ),
        }

        let mut value = result?;
        if let Some(recorder) = &self.recorder {
            recorder
                .record(
                    method.as_str(),
                    &sanitized_url,
                    &request.path,
                    context.request.body_text(),
                    &value,
                )
                .await;
        }
        normalize_response(&mut value);
        Ok(value)
    }

    /// Check that the API server is reachable.
    ///
    /// Makes a single GET of the capabilities endpoint with no retry and no
    /// middleware, bounded by the configured probe timeout.
    ///
    /// # Errors
    ///
    /// - [`ApiError::ConnectivityTimeout`] if the server does not answer in time
    /// - [`ApiError::Server`] for a non-2xx status
    /// - [`ApiError::Transport`] if the connection fails
    pub async fn verify_connectivity(&self) -> Result<ServerCapabilities, ApiError> {
        info!(base_url = %self.base_url, "Verifying API server connectivity");

        let mut request = HttpRequest::new(Method::GET, format!("{}{}", self.base_url, CAPABILITIES_PATH))
            .with_timeout(self.probe_timeout);
        request.headers = self.identity_headers.clone();

        let response = match tokio::time::timeout(self.probe_timeout, self.client.send(request)).await {
            Err(_) | Ok(Err(TransportError::Timeout)) => {
                warn!(timeout = ?self.probe_timeout, "API server connectivity check timed out");
                return Err(ApiError::ConnectivityTimeout(self.probe_timeout));
            }
            Ok(Err(source)) => {
                warn!(error = %source, "Error connecting to the API server");
                return Err(ApiError::Transport { source, attempts: 1 });
            }
            Ok(Ok(response)) => response,
        };

        info!(status = response.status, "API server status");
        if !response.is_success() {
            return Err(ServerError::from_body(
                response.status,
                &response.reason,
                &response.body,
                response.request_id().map(str::to_string),
            )
            .into());
        }
        response.json().map_err(|e| ApiError::Decode(e.to_string()))
    }

    fn build_http_request(&self, request: &Request, url: String) -> Result<HttpRequest, ApiError> {
        let mut http = HttpRequest::new(request.method.clone(), url);
        http.headers = self.identity_headers.clone();
        http.timeout = request.timeout;

        let token = match &request.token {
            Some(token) => Some(token.clone()),
            None if request.is_no_auth() => None,
            None => self.token(),
        };
        if let Some(token) = token {
            match HeaderValue::from_str(&format!("Bearer {}", token)) {
                Ok(value) => {
                    http.headers.insert(AUTHORIZATION, value);
                }
                Err(_) => warn!("Bearer token is not a valid header value; sending without it"),
            }
        }

        if let Some(body) = &request.body {
            let encoded = serde_json::to_vec(body).map_err(|e| ApiError::Decode(e.to_string()))?;
            http.body = Some(Bytes::from(encoded));
        }
        Ok(http)
    }

    /// Send with retry. Returns the final outcome and the number of attempts.
    async fn send_with_retry(
        &self,
        request: &HttpRequest,
        sanitized_url: &str,
    ) -> (Result<HttpResponse, TransportError>, u32) {
        let mut retries = 0;
        loop {
            let result = self.client.send(request.clone()).await;
            let retryable = match &result {
                Ok(response) => is_retryable_status(response.status),
                Err(_) => true,
            };
            if !retryable || retries >= self.retry.max_retries {
                return (result, retries + 1);
            }

            retries += 1;
            let delay = self.retry.delay_for_attempt(retries);
            match &result {
                Ok(response) => debug!(
                    url = %sanitized_url,
                    status = response.status,
                    retry = retries,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying API call"
                ),
                Err(e) if is_quiet(e) => debug!(
                    url = %sanitized_url,
                    error = %e,
                    retry = retries,
                    "Retrying API call"
                ),
                Err(e) => warn!(
                    url = %sanitized_url,
                    error = %e,
                    retry = retries,
                    "Retrying API call"
                ),
            }
            metrics::counter!(names::API_REQUEST_RETRIES).increment(1);
            tokio::time::sleep(delay).await;
        }
    }

    fn server_failure(
        &self,
        call_id: u64,
        method: &Method,
        sanitized_url: &str,
        response: &HttpResponse,
        attempts: u32,
    ) -> ApiError {
        let request_id = response.request_id().map(str::to_string);
        let trace = format!(
            "API({}): FAILED({}x) {} {}",
            request_id.as_deref().unwrap_or("-"),
            attempts.saturating_sub(1),
            method,
            sanitized_url
        );
        self.reporter.report_breadcrumb(Breadcrumb::new(
            "apiErrorResponse",
            trace,
            json!({ "call": call_id }),
        ));

        let error = ServerError::from_body(response.status, &response.reason, &response.body, request_id);

        // 401 is expected on token expiry and handled by the caller.
        if response.status != 401 {
            self.reporter.report_message(ReportMessage {
                level: ReportLevel::Error,
                message: format!("[Server Error]: {}", error.message),
                extra: json!({
                    "data": error.info,
                    "responseStatus": response.status,
                    "requestId": error.request_id,
                    "requestUrl": sanitized_url,
                }),
            });
        }
        ApiError::Server(error)
    }
}

fn decode_body(response: &HttpResponse) -> Result<Value, ApiError> {
    if !response.is_success() {
        // Mapped to a server error by the caller.
        return Err(ApiError::Decode(format!("status {}", response.status)));
    }
    if response.body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    response.json().map_err(|e| ApiError::Decode(e.to_string()))
}

fn is_quiet(error: &TransportError) -> bool {
    let text = error.to_string().to_lowercase();
    QUIET_SIGNATURES.iter().any(|s| text.contains(s))
}
