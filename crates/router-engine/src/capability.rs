//! Per-backend model capability cache.
//!
//! Tracks which model ids each backend is known to support, refreshed
//! opportunistically from the backend's model listing. A backend with no
//! entry is assumed to support everything: nothing is known yet, and
//! rejecting it would starve routing on a cold cache. Entries go stale after
//! the TTL but are never evicted, only refreshed.

use crate::chain::FallbackChain;
use dashmap::DashMap;
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tracing::debug;

/// Default freshness window for cache entries.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug)]
struct CacheEntry {
    models: HashSet<String>,
    refreshed_at: Instant,
}

/// Capability cache for all backends.
#[derive(Debug)]
pub struct ModelCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
}

impl Default for ModelCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}

impl ModelCache {
    /// Create a cache with the given TTL.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Whether the backend's entry exists and is inside the TTL.
    pub fn is_fresh(&self, backend: &str) -> bool {
        self.entries
            .get(backend)
            .is_some_and(|entry| entry.refreshed_at.elapsed() < self.ttl)
    }

    /// Whether the backend is known (or assumed) to support the model.
    pub fn supports(&self, backend: &str, model: &str) -> bool {
        self.entries
            .get(backend)
            .map_or(true, |entry| entry.models.contains(model))
    }

    /// Replace the backend's entry with a fresh model set.
    pub fn update(&self, backend: &str, models: impl IntoIterator<Item = String>) {
        let models: HashSet<String> = models.into_iter().collect();
        debug!(backend = %backend, models = models.len(), "Updated model cache");
        self.entries.insert(
            backend.to_string(),
            CacheEntry {
                models,
                refreshed_at: Instant::now(),
            },
        );
    }

    /// First chain option the backend supports, in chain order.
    pub fn best_supported(&self, backend: &str, chain: &FallbackChain) -> Option<String> {
        chain
            .options()
            .iter()
            .find(|option| self.supports(backend, option))
            .cloned()
    }

    /// Number of cached model ids for the backend, if an entry exists.
    pub fn cached_model_count(&self, backend: &str) -> Option<usize> {
        self.entries.get(backend).map(|entry| entry.models.len())
    }
}
