//! Error types for the dispatch pipeline.
//!
//! Callers see exactly one [`RestError`] per failed call:
//! - `Disposed` when the client has been shut down (no network activity happened).
//! - `Http` when the final response carried a status mapped to an [`HttpErrorKind`].
//! - `Transport` when the transport itself failed; the original error is preserved.
//!
//! Rate-limit waits that the pipeline resolves on its own never appear here; they travel
//! as values through the retry layer.
use crate::request::BuiltRequest;
use crate::response::RawResponse;
use http::StatusCode;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Category of a status-mapped failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpErrorKind {
    /// 400, 405
    BadRequest,
    /// 401, 403
    Unauthorized,
    /// 404
    NotFound,
    /// 413
    RequestTooLarge,
    /// 429 after the retry budget ran out
    RateLimited,
    /// 500, 502, 503, 504
    ServerError,
}

impl HttpErrorKind {
    /// Map a status code onto an error kind. `None` means the status counts as success.
    pub fn from_status(status: StatusCode) -> Option<Self> {
        match status.as_u16() {
            400 | 405 => Some(Self::BadRequest),
            401 | 403 => Some(Self::Unauthorized),
            404 => Some(Self::NotFound),
            413 => Some(Self::RequestTooLarge),
            429 => Some(Self::RateLimited),
            500 | 502 | 503 | 504 => Some(Self::ServerError),
            _ => None,
        }
    }

    /// Stable identifier used in log events.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest => "bad_request",
            Self::Unauthorized => "unauthorized",
            Self::NotFound => "not_found",
            Self::RequestTooLarge => "request_too_large",
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
        }
    }
}

impl fmt::Display for HttpErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broad classification of transport failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The send did not complete within the configured request timeout.
    Timeout,
    /// The connection could not be established or was reset.
    Connect,
    /// Anything else; treated as permanent.
    Other,
}

/// Failure reported by a [`Transport`](crate::transport::Transport).
#[derive(Debug, Error)]
#[error("{kind:?} transport failure: {message}")]
pub struct TransportError {
    kind: TransportErrorKind,
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), source: None }
    }

    /// Attach the underlying error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(TransportErrorKind::Timeout, format!("no response after {:?}", after))
    }

    pub fn connect(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Connect, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Other, message)
    }

    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    /// Timeouts and connection failures are worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self.kind, TransportErrorKind::Timeout | TransportErrorKind::Connect)
    }
}

/// Error returned by [`RestClient::execute`](crate::RestClient::execute).
#[derive(Debug, Error)]
pub enum RestError {
    /// The client was disposed before or during the call.
    #[error("rest client has been disposed")]
    Disposed,
    /// The final response carried an error status.
    #[error("{kind} ({}) from {} {}", .response.status, .request.method, .request.url)]
    Http {
        kind: HttpErrorKind,
        request: Box<BuiltRequest>,
        response: Box<RawResponse>,
    },
    /// The transport failed; propagated unchanged.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl RestError {
    pub(crate) fn http(kind: HttpErrorKind, request: BuiltRequest, response: RawResponse) -> Self {
        Self::Http { kind, request: Box::new(request), response: Box::new(response) }
    }

    /// Status-mapped category, if this is an HTTP failure.
    pub fn kind(&self) -> Option<HttpErrorKind> {
        match self {
            Self::Http { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// The wire request that produced the failing response.
    pub fn request(&self) -> Option<&BuiltRequest> {
        match self {
            Self::Http { request, .. } => Some(request),
            _ => None,
        }
    }

    /// The raw failing response (status, headers, body).
    pub fn response(&self) -> Option<&RawResponse> {
        match self {
            Self::Http { response, .. } => Some(response),
            _ => None,
        }
    }

    pub fn is_disposed(&self) -> bool {
        matches!(self, Self::Disposed)
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::Http { kind: HttpErrorKind::RateLimited, .. })
    }

    /// Borrow the transport failure if present.
    pub fn as_transport(&self) -> Option<&TransportError> {
        match self {
            Self::Transport(e) => Some(e),
            _ => None,
        }
    }

    /// Stable category for log events.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Disposed => "disposed",
            Self::Http { .. } => "http_error",
            Self::Transport(_) => "transport_failure",
        }
    }
}

/// Errors produced while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    MustBePositive { field: &'static str },
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
}
