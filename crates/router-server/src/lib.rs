//! # Router Server
//!
//! HTTP server for the LLM router.
//!
//! This crate provides:
//! - Axum-based HTTP server with graceful shutdown
//! - OpenAI-compatible `/v1` endpoints, streaming included
//! - Router observability endpoints (stats, health, rate limits)
//! - Optional bearer-key authentication with per-key usage metrics

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod routes;
pub mod server;
pub mod state;

pub use auth::AuthService;
pub use error::ApiError;
pub use logging::init_logging;
pub use routes::create_router;
pub use server::{Server, ServerConfig};
pub use state::AppState;
