use crate::cache::CacheError;
use crate::upstream::UpstreamError;
use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ErrorContext {
    /// Field path that caused the error (e.g., "request.question", "schema.enumChoices")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected shape, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "request_validator", "answer_validator")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Unified error type for choroquery.
///
/// Every failure an `answer` call can surface is one of these variants, so
/// callers can tell "the model answered badly" (`Response`) apart from "the
/// call failed" (`Upstream`) and from their own bad input (`Request`).
#[derive(Debug, Error)]
pub enum Error {
    #[error("Request parse error: {message}{}", format_context(.context))]
    Request {
        message: String,
        context: ErrorContext,
    },

    #[error("Response parse error: {message}{}", format_context(.context))]
    Response {
        message: String,
        context: ErrorContext,
    },

    #[error("Upstream provider error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Cache backend error: {0}")]
    Cache(#[from] CacheError),

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    /// Create a new request-validation error with structured context
    pub fn request_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Request {
            message: msg.into(),
            context,
        }
    }

    /// Create a new request-validation error without context
    pub fn request(msg: impl Into<String>) -> Self {
        Error::Request {
            message: msg.into(),
            context: ErrorContext::new(),
        }
    }

    /// Create a new response-shape error with structured context
    pub fn response_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Response {
            message: msg.into(),
            context,
        }
    }

    /// Create a new response-shape error without context
    pub fn response(msg: impl Into<String>) -> Self {
        Error::Response {
            message: msg.into(),
            context: ErrorContext::new(),
        }
    }

    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Request { context, .. }
            | Error::Response { context, .. }
            | Error::Configuration { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Whether a retry of the same logical request may succeed.
    ///
    /// Request and response shape errors are deterministic; transport and
    /// backend faults are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Upstream(e) => e.is_retryable(),
            Error::Cache(_) | Error::Io(_) => true,
            _ => false,
        }
    }
}
