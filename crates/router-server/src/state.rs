//! Shared application state.

use crate::auth::AuthService;
use router_engine::Router;
use std::sync::Arc;

/// State injected into every handler.
///
/// Built once at startup; nothing here is a global singleton.
#[derive(Clone)]
pub struct AppState {
    /// The selection and failover engine.
    pub router: Arc<Router>,
    /// Authentication gate.
    pub auth: Arc<AuthService>,
}

impl AppState {
    /// Assemble the application state.
    #[must_use]
    pub fn new(router: Arc<Router>, auth: Arc<AuthService>) -> Self {
        Self { router, auth }
    }
}
