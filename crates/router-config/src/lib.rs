//! # Router Config
//!
//! Configuration management for the LLM router.
//!
//! Backends come from one of three sources, in precedence order:
//! 1. A YAML file named by `ROUTER_CONFIG_PATH`
//! 2. A JSON backend list in the `ROUTER_SERVICES` environment variable
//! 3. Per-vendor environment variables (`CEREBRAS_API_KEY`, `DEEPINFRA_TOKEN`,
//!    `OPENAI_API_KEY`, `OLLAMA_BASE_URL`), always ending with a local Ollama
//!    entry so a bare process still routes somewhere

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod settings;

pub use backend::{BackendConfig, RateLimitPolicy};
pub use settings::{ConfigError, Settings};
