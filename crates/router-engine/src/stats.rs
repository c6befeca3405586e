//! Process-wide routing counters and observability report types.

use crate::limiter::WindowStatus;
use dashmap::DashMap;
use router_core::BackendType;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-backend counters.
#[derive(Debug, Default)]
pub(crate) struct BackendCounters {
    pub(crate) requests: AtomicU64,
    pub(crate) failures: AtomicU64,
    pub(crate) rate_limited: AtomicU64,
}

/// Cumulative routing counters, reset only by an explicit operation.
#[derive(Debug, Default)]
pub(crate) struct RouterCounters {
    requests: AtomicU64,
    failovers: AtomicU64,
    rate_limit_skips: AtomicU64,
    per_backend: DashMap<String, BackendCounters>,
}

impl RouterCounters {
    pub(crate) fn new(backend_names: impl IntoIterator<Item = String>) -> Self {
        let counters = Self::default();
        for name in backend_names {
            counters.per_backend.insert(name, BackendCounters::default());
        }
        counters
    }

    pub(crate) fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failover(&self) {
        self.failovers.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rate_limit_skip(&self) {
        self.rate_limit_skips.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_backend_request(&self, backend: &str) {
        self.backend(backend).requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_backend_failure(&self, backend: &str) {
        self.backend(backend).failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_backend_rate_limited(&self, backend: &str) {
        self.backend(backend)
            .rate_limited
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn totals(&self) -> (u64, u64, u64) {
        (
            self.requests.load(Ordering::Relaxed),
            self.failovers.load(Ordering::Relaxed),
            self.rate_limit_skips.load(Ordering::Relaxed),
        )
    }

    pub(crate) fn backend_snapshot(&self, backend: &str) -> (u64, u64, u64) {
        self.per_backend.get(backend).map_or((0, 0, 0), |counters| {
            (
                counters.requests.load(Ordering::Relaxed),
                counters.failures.load(Ordering::Relaxed),
                counters.rate_limited.load(Ordering::Relaxed),
            )
        })
    }

    pub(crate) fn reset(&self) {
        self.requests.store(0, Ordering::Relaxed);
        self.failovers.store(0, Ordering::Relaxed);
        self.rate_limit_skips.store(0, Ordering::Relaxed);
        for counters in self.per_backend.iter() {
            counters.requests.store(0, Ordering::Relaxed);
            counters.failures.store(0, Ordering::Relaxed);
            counters.rate_limited.store(0, Ordering::Relaxed);
        }
    }

    fn backend(&self, backend: &str) -> dashmap::mapref::one::RefMut<'_, String, BackendCounters> {
        self.per_backend.entry(backend.to_string()).or_default()
    }
}

/// Per-backend counter snapshot in stats reports.
#[derive(Debug, Clone, Serialize)]
pub struct BackendStats {
    /// Requests dispatched to this backend.
    pub requests: u64,
    /// Failed attempts.
    pub failures: u64,
    /// Times this backend was skipped because its window was saturated.
    pub rate_limited: u64,
}

/// Cumulative router statistics plus live rate-limit occupancy.
#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    /// Total inbound chat requests.
    pub total_requests: u64,
    /// Total failover transitions between backends.
    pub total_failovers: u64,
    /// Rate-limit skips counted on first attempt rounds.
    pub total_rate_limit_skips: u64,
    /// Failovers per request, as a percentage.
    pub failover_rate: f64,
    /// Rate-limit skips per request, as a percentage.
    pub rate_limit_skip_rate: f64,
    /// Number of configured backends.
    pub configured_backends: usize,
    /// Per-backend counters.
    pub backend_stats: BTreeMap<String, BackendStats>,
    /// Backend names in priority order.
    pub backend_order: Vec<String>,
    /// Live window occupancy per backend.
    pub rate_limiting: BTreeMap<String, WindowStatus>,
}

/// Classification of one backend's recent behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    /// No requests recorded yet.
    Unknown,
    /// Failure rate below 10%.
    Healthy,
    /// Failure rate below 50%.
    Degraded,
    /// Failure rate at or above 50%.
    Unhealthy,
}

/// Health detail for one backend.
#[derive(Debug, Clone, Serialize)]
pub struct BackendHealth {
    /// Classified status.
    pub status: HealthState,
    /// Backend type.
    pub backend_type: BackendType,
    /// Upstream base URL.
    pub base_url: String,
    /// Whether a credential is configured.
    pub has_api_key: bool,
    /// Requests dispatched.
    pub requests: u64,
    /// Failed attempts.
    pub failures: u64,
    /// Failure rate as a percentage.
    pub failure_rate: f64,
    /// Rate-limit skip events observed for this backend.
    pub rate_limited_events: u64,
    /// Whether the backend is saturated right now.
    pub is_currently_rate_limited: bool,
    /// Rate-limit policy, when one is configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit_config: Option<RateLimitConfig>,
}

/// Rate-limit policy summary in health reports.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitConfig {
    /// Maximum requests per window.
    pub max_requests: u32,
    /// Window length in seconds.
    pub window_seconds: u64,
}

/// Health report for all backends.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Derived overall status.
    pub overall_status: HealthState,
    /// Per-backend health.
    pub backends: BTreeMap<String, BackendHealth>,
}

/// Classify a backend from its request/failure counts.
pub(crate) fn classify(requests: u64, failures: u64) -> HealthState {
    if requests == 0 {
        return HealthState::Unknown;
    }
    let failure_rate = failures as f64 / requests as f64;
    if failure_rate < 0.1 {
        HealthState::Healthy
    } else if failure_rate < 0.5 {
        HealthState::Degraded
    } else {
        HealthState::Unhealthy
    }
}

/// Round a ratio to a two-decimal percentage.
pub(crate) fn percentage(numerator: u64, denominator: u64) -> f64 {
    let rate = numerator as f64 / denominator.max(1) as f64 * 100.0;
    (rate * 100.0).round() / 100.0
}
