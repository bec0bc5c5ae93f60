//! # syncline-transport
//!
//! Network layer for the Syncline client core.
//!
//! - **Request pipeline** - Auth injection, middleware, bounded retry and
//!   error mapping for every API call
//! - **HTTP client** - `reqwest`-backed implementation of [`HttpClient`]
//! - **Realtime event source** - WebSocket implementation of [`EventSource`]
//!
//! ## Pipeline
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use syncline_transport::{PipelineConfig, ReqwestClient, ReqwestConfig, RequestPipeline};
//!
//! let client = Arc::new(ReqwestClient::new(ReqwestConfig::default())?);
//! let pipeline = RequestPipeline::new(PipelineConfig::default(), client)?;
//! pipeline.set_token("secret");
//! let teams = pipeline.get("/teams").await?;
//! ```

pub mod client;
pub mod error;
pub mod middleware;
pub mod pipeline;
pub mod recorder;
pub mod reporter;
pub mod request;
pub mod retry;
pub mod sanitize;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use client::{ReqwestClient, ReqwestConfig};
pub use error::{ApiError, ServerError};
pub use middleware::{Middleware, MiddlewareContext, MiddlewareError, MiddlewareHandle};
pub use pipeline::{PipelineConfig, RequestPipeline, ServerCapabilities, CAPABILITIES_PATH};
pub use reporter::{Breadcrumb, ErrorReporter, ReportLevel, ReportMessage, TracingReporter};
pub use request::{ClientIdentity, Request};
pub use retry::RetryPolicy;
pub use traits::{EventSource, HttpClient, HttpRequest, HttpResponse, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConfig, WebSocketEventSource};

/// Metric names recorded by this crate.
pub mod names {
    /// API calls by method and outcome.
    pub const API_REQUESTS_TOTAL: &str = "syncline_api_requests_total";
    /// API call retries.
    pub const API_REQUEST_RETRIES: &str = "syncline_api_request_retries_total";
    /// API call latency in seconds, including retries.
    pub const API_REQUEST_DURATION: &str = "syncline_api_request_duration_seconds";
}
