//! Per-backend sliding-window rate limiter.
//!
//! Each backend gets a window of recent request instants, trimmed of entries
//! older than the policy window on every read. A backend with no configured
//! policy is never limited. State is sharded per backend via `DashMap`, so
//! concurrent requests contend only when they target the same backend.

use dashmap::DashMap;
use router_config::RateLimitPolicy;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Instant;

/// Sliding-window request tracker for all backends.
#[derive(Debug, Default)]
pub struct RateLimiter {
    windows: DashMap<String, VecDeque<Instant>>,
}

/// Point-in-time view of one backend's window, for observability.
#[derive(Debug, Clone, Serialize)]
pub struct WindowStatus {
    /// Human-readable policy, e.g. `30/60s`, or `none`.
    pub rate_limit: String,
    /// Requests currently inside the window.
    pub current_requests: usize,
    /// Requests left before saturation; `None` means unlimited.
    pub remaining_quota: Option<u32>,
    /// Whether the backend is saturated right now.
    pub is_rate_limited: bool,
    /// Seconds until the oldest window entry expires.
    pub window_reset_in: f64,
}

impl RateLimiter {
    /// Create an empty limiter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an attempt against the backend's window.
    ///
    /// Called before the upstream request goes out: an attempt counts against
    /// quota regardless of its outcome.
    pub fn record(&self, backend: &str) {
        self.windows
            .entry(backend.to_string())
            .or_default()
            .push_back(Instant::now());
    }

    /// Whether the backend is currently saturated under the given policy.
    ///
    /// Trims expired entries as a side effect.
    pub fn is_limited(&self, backend: &str, policy: &RateLimitPolicy) -> bool {
        if policy.max_requests == 0 {
            return false;
        }
        let mut window = self.windows.entry(backend.to_string()).or_default();
        trim(&mut window, policy);
        window.len() >= policy.max_requests as usize
    }

    /// Observability snapshot for one backend.
    pub fn status(&self, backend: &str, policy: Option<&RateLimitPolicy>) -> WindowStatus {
        let Some(policy) = policy.filter(|p| p.max_requests > 0) else {
            return WindowStatus {
                rate_limit: "none".to_string(),
                current_requests: 0,
                remaining_quota: None,
                is_rate_limited: false,
                window_reset_in: 0.0,
            };
        };

        let mut window = self.windows.entry(backend.to_string()).or_default();
        trim(&mut window, policy);

        let current_requests = window.len();
        let window_reset_in = window.front().map_or(0.0, |oldest| {
            let remaining = policy.window.as_secs_f64() - oldest.elapsed().as_secs_f64();
            (remaining.max(0.0) * 10.0).round() / 10.0
        });

        WindowStatus {
            rate_limit: format!("{}/{}s", policy.max_requests, policy.window.as_secs()),
            current_requests,
            remaining_quota: Some(
                policy
                    .max_requests
                    .saturating_sub(current_requests as u32),
            ),
            is_rate_limited: current_requests >= policy.max_requests as usize,
            window_reset_in,
        }
    }

    /// Empty every window, keeping the per-backend slots allocated.
    pub fn clear(&self) {
        for mut window in self.windows.iter_mut() {
            window.clear();
        }
    }
}

fn trim(window: &mut VecDeque<Instant>, policy: &RateLimitPolicy) {
    while window
        .front()
        .is_some_and(|oldest| oldest.elapsed() >= policy.window)
    {
        window.pop_front();
    }
}
