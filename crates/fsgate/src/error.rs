//! Error types for fsgate
//!
//! Design goals, carried over from how the gateway surfaces failures:
//! - One variant per failure class so callers can decide on retry or display
//! - No leakage of backend internals (host paths, connection strings) in
//!   [`Error::user_message`]
//! - Request context attached by the router without changing the error kind

use std::fmt;
use std::io::ErrorKind as IoErrorKind;

use thiserror::Error;

use crate::provider::QuotaExceeded;

/// Result type alias using fsgate's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// fsgate error types.
#[derive(Error, Debug)]
pub enum Error {
    /// Provider or gateway configuration is invalid or incomplete.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Sandbox violation or ACL denial. Never retried.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Transport or IO failure. Eligible for caller-level retry.
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Unknown or inactive provider id.
    #[error("provider not found: {0}")]
    ProviderNotFound(String),

    /// Backend storage limit reached.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(#[from] QuotaExceeded),

    /// No auth strategy registered under the requested name.
    #[error("unknown auth strategy: {0}")]
    UnknownStrategy(String),

    /// Unexpected failure. Displayed to users only as a generic message.
    #[error("internal error: {0}")]
    Internal(String),

    /// A provider error enriched with the request it belongs to.
    #[error("{context}: {source}")]
    Request {
        context: RequestContext,
        #[source]
        source: Box<Error>,
    },
}

/// Error classification, stable across the [`Error::Request`] wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    NotFound,
    AccessDenied,
    ProviderUnavailable,
    ProviderNotFound,
    QuotaExceeded,
    UnknownStrategy,
    Internal,
}

impl ErrorKind {
    /// Stable snake_case name, used in audit events.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::NotFound => "not_found",
            ErrorKind::AccessDenied => "access_denied",
            ErrorKind::ProviderUnavailable => "provider_unavailable",
            ErrorKind::ProviderNotFound => "provider_not_found",
            ErrorKind::QuotaExceeded => "quota_exceeded",
            ErrorKind::UnknownStrategy => "unknown_strategy",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a routed operation failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub provider_id: String,
    pub path: String,
    pub operation: String,
}

impl fmt::Display for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} '{}' on provider '{}'",
            self.operation, self.path, self.provider_id
        )
    }
}

impl Error {
    /// Classify the error, looking through request context.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Configuration(_) => ErrorKind::Configuration,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::AccessDenied(_) => ErrorKind::AccessDenied,
            Error::ProviderUnavailable(_) => ErrorKind::ProviderUnavailable,
            Error::ProviderNotFound(_) => ErrorKind::ProviderNotFound,
            Error::QuotaExceeded(_) => ErrorKind::QuotaExceeded,
            Error::UnknownStrategy(_) => ErrorKind::UnknownStrategy,
            Error::Internal(_) => ErrorKind::Internal,
            Error::Request { source, .. } => source.kind(),
        }
    }

    /// Attach request context. Already-wrapped errors keep their original context.
    pub fn with_context(self, context: RequestContext) -> Self {
        match self {
            Error::Request { .. } => self,
            other => Error::Request {
                context,
                source: Box::new(other),
            },
        }
    }

    /// Request context, if the router attached one.
    pub fn context(&self) -> Option<&RequestContext> {
        match self {
            Error::Request { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Whether a caller may retry the operation with backoff.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::ProviderUnavailable
    }

    /// Human-readable message safe to return to end users.
    ///
    /// Recoverable kinds keep their message. Internal failures and transport
    /// errors are reduced to a generic text so backend detail never leaks.
    pub fn user_message(&self) -> String {
        match self {
            Error::Request { context, source } => match source.kind() {
                ErrorKind::Internal => "internal error".to_string(),
                ErrorKind::ProviderUnavailable => {
                    format!("provider '{}' is unavailable", context.provider_id)
                }
                _ => source.to_string(),
            },
            Error::Internal(_) => "internal error".to_string(),
            Error::ProviderUnavailable(_) => "provider is unavailable".to_string(),
            other => other.to_string(),
        }
    }

    /// Map an IO error into the gateway taxonomy.
    ///
    /// `path` is the request-relative path; the host path is never included.
    pub fn from_io(err: std::io::Error, path: &str) -> Self {
        match err.kind() {
            IoErrorKind::NotFound => Error::NotFound(path.to_string()),
            IoErrorKind::PermissionDenied => Error::AccessDenied(path.to_string()),
            _ => Error::ProviderUnavailable(format!("{}: {}", path, err)),
        }
    }
}
