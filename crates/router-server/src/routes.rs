//! Route definitions.

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::{auth, handlers, state::AppState};

/// Create the main API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        // Router observability
        .route("/router/stats", get(handlers::router_stats))
        .route("/router/health", get(handlers::router_health))
        .route("/router/rate-limits", get(handlers::router_rate_limits))
        .route("/router/reset-stats", post(handlers::reset_router_stats))
        .route("/auth/metrics", get(handlers::auth_metrics))
        // OpenAI-compatible endpoints, behind the auth gate
        .nest("/v1", openai_routes(state.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// OpenAI-compatible API routes.
fn openai_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/chat/completions", post(handlers::chat_completions))
        .route("/models", get(handlers::list_models))
        .route("/models/:model_id", get(handlers::get_model))
        .layer(middleware::from_fn_with_state(state, auth::auth_middleware))
}
