//! # LLM Router
//!
//! OpenAI-compatible router that fans a single chat API out to multiple
//! upstream LLM backends, with priority-ordered failover, per-backend rate
//! limits, model capability discovery, and streaming transcoding.
//!
//! ## Usage
//!
//! ```bash
//! # Route across backends discovered from the environment
//! CEREBRAS_API_KEY=csk-... OPENAI_API_KEY=sk-... llm-router
//!
//! # Or configure backends explicitly
//! ROUTER_SERVICES='[{"name":"cerebras","backend_type":"cerebras",...}]' llm-router
//!
//! # Or point at a YAML config file
//! ROUTER_CONFIG_PATH=/etc/llm-router.yaml llm-router
//! ```

use anyhow::Context;
use router_config::Settings;
use router_core::ChatBackend;
use router_engine::Router;
use router_server::{init_logging, AppState, AuthService, Server, ServerConfig};
use router_upstream::UpstreamClient;
use std::sync::Arc;
use tracing::{error, info};

/// Application entry point
#[tokio::main]
async fn main() {
    if let Err(e) = init_logging("info") {
        eprintln!("Failed to initialize logging: {e}");
    }

    info!(version = env!("CARGO_PKG_VERSION"), "Starting LLM router");

    if let Err(e) = run().await {
        error!(error = %e, "Application failed");
        std::process::exit(1);
    }
}

/// Main application logic
async fn run() -> anyhow::Result<()> {
    let settings = Settings::load().await.context("loading configuration")?;

    info!(
        host = %settings.host,
        port = settings.port,
        backends = settings.backends.len(),
        "Configuration loaded"
    );

    let mut backends: Vec<(router_config::BackendConfig, Arc<dyn ChatBackend>)> = Vec::new();
    for config in &settings.backends {
        let client = UpstreamClient::new(config)
            .with_context(|| format!("initializing backend '{}'", config.name))?;
        info!(
            backend = %config.name,
            backend_type = %config.backend_type,
            priority = config.priority,
            "Initialized backend"
        );
        backends.push((config.clone(), Arc::new(client)));
    }

    let router = Router::new(backends).context("building router")?;
    let auth = AuthService::from_env(settings.enable_auth);

    let state = AppState::new(Arc::new(router), Arc::new(auth));
    let server = Server::new(ServerConfig::new(&settings.host, settings.port), state);

    server.run().await.context("running server")?;
    Ok(())
}
