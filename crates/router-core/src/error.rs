//! Error types for the router.
//!
//! Per-attempt upstream failures are recorded by the selection engine and only
//! surfaced once every eligible backend has been tried; the HTTP layer maps
//! each variant onto an OpenAI-style error envelope.

use thiserror::Error;

/// Convenience result alias used across router crates.
pub type RouterResult<T> = Result<T, RouterError>;

/// All errors the router can produce.
#[derive(Debug, Error)]
pub enum RouterError {
    /// An upstream request exceeded the backend's configured deadline.
    #[error("request to backend '{backend}' timed out")]
    UpstreamTimeout {
        /// Name of the backend that timed out.
        backend: String,
    },

    /// The backend could not be reached at the transport level.
    #[error("connection error to backend '{backend}': {message}")]
    UpstreamConnection {
        /// Name of the unreachable backend.
        backend: String,
        /// Transport-level failure detail.
        message: String,
    },

    /// The backend answered with a non-2xx status.
    #[error("[{backend}] {message}")]
    UpstreamApi {
        /// Name of the backend that rejected the request.
        backend: String,
        /// HTTP status returned by the backend.
        status: u16,
        /// Best-effort error message extracted from the response body.
        message: String,
    },

    /// Every untried backend is currently saturated by its rate limit.
    #[error("all configured backends are rate limited")]
    AllBackendsRateLimited {
        /// Backends attempted before giving up.
        attempted: usize,
        /// Total configured backends.
        total: usize,
    },

    /// No configured backend supports any model in the requested fallback chain.
    #[error("no backend supports any of the requested models: {requested}")]
    NoCapableBackend {
        /// The original (possibly pipe-delimited) model string.
        requested: String,
    },

    /// Every backend was attempted and none produced a response.
    #[error("all configured backends are unavailable")]
    ServiceUnavailable {
        /// Backends attempted before giving up.
        attempted: usize,
        /// Total configured backends.
        total: usize,
    },

    /// The inbound request failed validation.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The router was misconfigured.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Unexpected internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RouterError {
    /// Machine-readable error tag used in the wire-level error envelope.
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::UpstreamTimeout { .. } => "timeout_error",
            Self::UpstreamConnection { .. } => "connection_error",
            Self::UpstreamApi { .. } => "api_error",
            Self::AllBackendsRateLimited { .. } => "rate_limit_exceeded",
            Self::NoCapableBackend { .. } => "model_not_supported",
            Self::ServiceUnavailable { .. } => "service_unavailable",
            Self::InvalidRequest(_) => "invalid_request_error",
            Self::Configuration(_) => "configuration_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Name of the backend this error originated from, if any.
    #[must_use]
    pub fn backend(&self) -> Option<&str> {
        match self {
            Self::UpstreamTimeout { backend }
            | Self::UpstreamConnection { backend, .. }
            | Self::UpstreamApi { backend, .. } => Some(backend),
            _ => None,
        }
    }
}
