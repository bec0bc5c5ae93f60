//! Request pipeline middleware.
//!
//! Middleware observe every API call. They run in registration order and can
//! inspect the outgoing request, short-circuit the network call with a
//! synthetic response, and inspect the final response. A failing middleware is
//! logged and skipped; it never aborts the call.

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Method;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

use crate::traits::{HttpRequest, HttpResponse};

/// Error returned by a middleware hook.
pub type MiddlewareError = Box<dyn std::error::Error + Send + Sync>;

/// Per-call state shared across the middleware chain.
///
/// Created when a call starts and discarded when it completes.
#[derive(Debug, Clone)]
pub struct MiddlewareContext {
    /// Absolute request URL.
    pub url: String,
    /// HTTP method.
    pub method: Method,
    /// The outgoing request.
    pub request: HttpRequest,
    /// The network response, once one has been received.
    pub response: Option<HttpResponse>,
}

impl MiddlewareContext {
    /// Create a context for an outgoing request.
    #[must_use]
    pub fn new(request: HttpRequest) -> Self {
        Self {
            url: request.url.clone(),
            method: request.method.clone(),
            request,
            response: None,
        }
    }
}

/// A request pipeline middleware.
///
/// Every hook has a no-op default so implementations override only what they
/// need.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Called before the network call.
    async fn on_request(&self, _context: &mut MiddlewareContext) -> Result<(), MiddlewareError> {
        Ok(())
    }

    /// Supply a synthetic response to skip the network call.
    ///
    /// The first middleware returning `Some` wins.
    async fn on_provide_response(
        &self,
        _context: &MiddlewareContext,
    ) -> Result<Option<Value>, MiddlewareError> {
        Ok(None)
    }

    /// Called after the call completes, on success and on failure.
    ///
    /// `result` is the decoded body when the call succeeded.
    async fn on_response(
        &self,
        _context: &MiddlewareContext,
        _result: Option<&Value>,
    ) -> Result<(), MiddlewareError> {
        Ok(())
    }
}

type Entry = (u64, Arc<dyn Middleware>);

/// Ordered, shared list of middleware.
///
/// Reads take a snapshot so a call in flight is unaffected by registrations
/// made while it runs.
#[derive(Default)]
pub struct MiddlewareChain {
    entries: Arc<RwLock<Vec<Entry>>>,
    next_id: AtomicU64,
}

impl MiddlewareChain {
    /// Create an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a middleware; it runs after every previously registered one.
    pub fn register(&self, middleware: Arc<dyn Middleware>) -> MiddlewareHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(middleware = %middleware.name(), "Middleware registered");
        self.entries.write().push((id, middleware));
        MiddlewareHandle {
            id,
            entries: Arc::downgrade(&self.entries),
        }
    }

    /// Snapshot of the current middleware, in registration order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<dyn Middleware>> {
        self.entries.read().iter().map(|(_, m)| m.clone()).collect()
    }

    /// Number of registered middleware.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if no middleware is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// Handle returned by [`MiddlewareChain::register`].
///
/// Dropping the handle leaves the middleware registered; call
/// [`MiddlewareHandle::dispose`] to remove it.
#[derive(Debug)]
pub struct MiddlewareHandle {
    id: u64,
    entries: Weak<RwLock<Vec<Entry>>>,
}

impl MiddlewareHandle {
    /// Unregister the middleware.
    ///
    /// Returns `true` if it was still registered.
    pub fn dispose(self) -> bool {
        let Some(entries) = self.entries.upgrade() else {
            return false;
        };
        let mut entries = entries.write();
        let before = entries.len();
        entries.retain(|(id, _)| *id != self.id);
        before != entries.len()
    }
}
