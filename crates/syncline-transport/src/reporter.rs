//! Error reporting sink.
//!
//! The pipeline records a breadcrumb for every failed call and reports a
//! message for unexpected server errors. Hosts plug in their own crash
//! reporter; the default writes everything to the log.

use serde_json::Value;
use tracing::{error, info};

/// Severity of a reported message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportLevel {
    /// Informational.
    Info,
    /// Warning.
    Warning,
    /// Error.
    Error,
}

/// A trail entry leading up to an error.
#[derive(Debug, Clone, PartialEq)]
pub struct Breadcrumb {
    /// Short description.
    pub message: String,
    /// Category, e.g. `api`.
    pub category: String,
    /// Structured context.
    pub data: Value,
}

impl Breadcrumb {
    /// Create a breadcrumb.
    #[must_use]
    pub fn new(category: impl Into<String>, message: impl Into<String>, data: Value) -> Self {
        Self {
            message: message.into(),
            category: category.into(),
            data,
        }
    }
}

/// A message sent to the error sink.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportMessage {
    /// Severity.
    pub level: ReportLevel,
    /// Message text.
    pub message: String,
    /// Structured context.
    pub extra: Value,
}

/// Sink for breadcrumbs and error messages.
pub trait ErrorReporter: Send + Sync {
    /// Record a breadcrumb.
    fn report_breadcrumb(&self, breadcrumb: Breadcrumb);

    /// Report a message.
    fn report_message(&self, message: ReportMessage);
}

/// Reporter that writes to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report_breadcrumb(&self, breadcrumb: Breadcrumb) {
        info!(
            category = %breadcrumb.category,
            data = %breadcrumb.data,
            "Breadcrumb: {}",
            breadcrumb.message
        );
    }

    fn report_message(&self, message: ReportMessage) {
        error!(
            level = ?message.level,
            extra = %message.extra,
            "Reported: {}",
            message.message
        );
    }
}
