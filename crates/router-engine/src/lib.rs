//! # Router Engine
//!
//! The selection and failover engine for the LLM router, together with its
//! two supporting state stores:
//!
//! - a per-backend sliding-window [rate limiter](limiter::RateLimiter)
//! - a per-backend [model capability cache](capability::ModelCache)
//!
//! The [`Router`] orchestrates an ordered attempt sequence across backends
//! for each inbound request, consulting both stores, invoking backend
//! adapters, and aggregating routing metadata, statistics, and health.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod capability;
pub mod chain;
pub mod limiter;
pub mod router;
pub mod stats;

pub use capability::{ModelCache, DEFAULT_CACHE_TTL};
pub use chain::FallbackChain;
pub use limiter::{RateLimiter, WindowStatus};
pub use router::{ChatOutcome, Router};
pub use stats::{BackendHealth, HealthReport, HealthState, StatsReport};
