//! HTTP error mapping.
//!
//! Every failure leaving the router is serialized as the OpenAI error
//! envelope `{"error": {"message", "type", ...}}` with a status matching the
//! error kind; upstream API errors pass their status through.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use router_core::RouterError;
use serde_json::{json, Map, Value};

/// An API-facing error with status, machine-readable tag, and detail fields.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    error_type: String,
    extra: Map<String, Value>,
}

impl ApiError {
    /// Build an error with an explicit status and type tag.
    #[must_use]
    pub fn new(status: StatusCode, error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            error_type: error_type.into(),
            extra: Map::new(),
        }
    }

    /// 401 with the OpenAI `invalid_api_key` style tag.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "invalid_api_key", message)
    }

    /// 404 for unknown resources.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found_error", message)
    }

    /// 422 for request bodies that fail validation.
    #[must_use]
    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "invalid_request_error",
            message,
        )
    }

    /// 500 for unexpected faults.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }

    /// Attach an extra field to the error object.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// The HTTP status this error maps to.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<RouterError> for ApiError {
    fn from(error: RouterError) -> Self {
        let status = match &error {
            RouterError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            RouterError::UpstreamConnection { .. } => StatusCode::BAD_GATEWAY,
            RouterError::UpstreamApi { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            RouterError::AllBackendsRateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            RouterError::NoCapableBackend { .. } | RouterError::ServiceUnavailable { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            RouterError::InvalidRequest(_) => StatusCode::UNPROCESSABLE_ENTITY,
            RouterError::Configuration(_) | RouterError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let mut api_error = Self::new(status, error.error_type(), error.to_string());

        if let Some(backend) = error.backend() {
            api_error = api_error.with_field("backend", Value::String(backend.to_string()));
        }
        if let RouterError::AllBackendsRateLimited { attempted, total }
        | RouterError::ServiceUnavailable { attempted, total } = &error
        {
            api_error = api_error
                .with_field("attempted_services", Value::from(*attempted))
                .with_field("total_services", Value::from(*total));
        }

        api_error
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut error_object = Map::new();
        error_object.insert("message".to_string(), Value::String(self.message));
        error_object.insert("type".to_string(), Value::String(self.error_type));
        error_object.extend(self.extra);

        (self.status, Json(json!({ "error": error_object }))).into_response()
    }
}
