//! HTTP request handlers.

use crate::error::ApiError;
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use router_core::{ChatCompletionRequest, ModelList, RoutingMetadata};
use router_engine::ChatOutcome;
use serde_json::{json, Value};
use tracing::{debug, info, instrument};
use validator::Validate;

/// `GET /` - basic service information.
pub async fn root(State(state): State<AppState>) -> Json<Value> {
    let services: Vec<Value> = state
        .router
        .descriptors()
        .map(|backend| {
            json!({
                "name": backend.name,
                "type": backend.backend_type,
                "priority": backend.priority,
            })
        })
        .collect();

    let primary_backend = state
        .router
        .descriptors()
        .next()
        .map(|backend| backend.backend_type.as_str().to_string());

    Json(json!({
        "message": "LLM Router - OpenAI API compatible endpoint",
        "version": env!("CARGO_PKG_VERSION"),
        "mode": "router",
        "services_count": services.len(),
        "services": services,
        "primary_backend": primary_backend,
    }))
}

/// `GET /health` - overall and per-backend health.
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let report = state.router.health();
    Json(json!({
        "status": report.overall_status,
        "mode": "router",
        "details": report,
    }))
}

/// `GET /router/stats` - cumulative routing statistics.
pub async fn router_stats(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.router.stats()))
}

/// `GET /router/health` - detailed backend health.
pub async fn router_health(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.router.health()))
}

/// `POST /router/reset-stats` - zero counters and limiter windows.
pub async fn reset_router_stats(State(state): State<AppState>) -> Json<Value> {
    state.router.reset_stats();
    Json(json!({
        "status": "success",
        "message": "Router statistics reset",
    }))
}

/// `GET /router/rate-limits` - live rate limiting status.
pub async fn router_rate_limits(State(state): State<AppState>) -> Json<Value> {
    let stats = state.router.stats();
    Json(json!({
        "rate_limiting": stats.rate_limiting,
        "total_rate_limit_skips": stats.total_rate_limit_skips,
        "rate_limit_skip_rate": stats.rate_limit_skip_rate,
        "current_time": Utc::now().timestamp(),
    }))
}

/// `GET /auth/metrics` - per-key usage metrics with masked keys.
pub async fn auth_metrics(State(state): State<AppState>) -> Json<Value> {
    Json(state.auth.metrics())
}

/// `POST /v1/chat/completions` - OpenAI-compatible chat completion.
///
/// Returns a JSON body with embedded `router` metadata, or a canonical SSE
/// stream (with `x-router-*` headers) when the request asks for streaming.
#[instrument(skip(state, body), fields(model = %body.model))]
pub async fn chat_completions(
    State(state): State<AppState>,
    Json(body): Json<ChatCompletionRequest>,
) -> Result<Response, ApiError> {
    body.validate()
        .map_err(|e| ApiError::unprocessable(e.to_string()))?;

    debug!(streaming = body.stream, "Processing chat completion request");

    match state.router.chat_completion(&body).await? {
        ChatOutcome::Complete(response) => {
            info!(
                backend = %response.router.as_ref().map_or("?", |m| m.service.as_str()),
                "Chat completion routed"
            );
            Ok(Json(*response).into_response())
        }
        ChatOutcome::Streaming { metadata, frames } => Ok(sse_response(&metadata, frames)),
    }
}

/// Wrap a canonical frame stream as an SSE response, carrying the routing
/// metadata in response headers since the body is opaque to the router.
fn sse_response(metadata: &RoutingMetadata, frames: router_core::FrameStream) -> Response {
    let mut response = Response::new(Body::from_stream(frames));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    if let Ok(value) = HeaderValue::from_str(&metadata.service) {
        headers.insert("x-router-service", value);
    }
    if let Ok(value) = HeaderValue::from_str(&metadata.attempt.to_string()) {
        headers.insert("x-router-attempt", value);
    }
    if let Ok(value) = HeaderValue::from_str(&metadata.actual_model) {
        headers.insert("x-router-model", value);
    }
    response
}

/// `GET /v1/models` - merged, tagged model listing.
#[instrument(skip(state))]
pub async fn list_models(State(state): State<AppState>) -> Json<ModelList> {
    let models = state.router.list_models().await;
    info!(models = models.data.len(), "Listed models");
    Json(models)
}

/// `GET /v1/models/{model_id}` - single model lookup.
#[instrument(skip(state))]
pub async fn get_model(
    State(state): State<AppState>,
    Path(model_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let models = state.router.list_models().await;

    models
        .data
        .into_iter()
        .find(|model| model.get("id").and_then(Value::as_str) == Some(model_id.as_str()))
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Model '{model_id}' not found")))
}
