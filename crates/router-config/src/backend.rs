//! Backend descriptor types.

use router_core::BackendType;
use secrecy::SecretString;
use serde::Deserialize;
use std::time::Duration;

/// Sliding-window rate limit policy for one backend.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RateLimitPolicy {
    /// Maximum requests allowed inside the window.
    pub max_requests: u32,
    /// Length of the sliding window.
    #[serde(with = "humantime_serde", default = "default_window")]
    pub window: Duration,
}

pub(crate) fn default_window() -> Duration {
    Duration::from_secs(60)
}

/// One configured upstream backend.
///
/// Immutable for the process lifetime; the selection engine orders these
/// ascending by `priority` (lower number = higher precedence) at startup.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Unique backend name.
    pub name: String,
    /// Kind of upstream.
    pub backend_type: BackendType,
    /// Base URL, e.g. `https://api.cerebras.ai/v1`.
    pub base_url: String,
    /// Credential, absent for local servers.
    pub api_key: Option<SecretString>,
    /// Per-backend request deadline.
    pub timeout: Duration,
    /// Selection precedence, ascending.
    pub priority: i32,
    /// Optional rate limit; `None` means the backend is never limited.
    pub rate_limit: Option<RateLimitPolicy>,
}

impl BackendConfig {
    /// Create a descriptor with the defaults the env loader uses.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        backend_type: BackendType,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            backend_type,
            base_url: base_url.into(),
            api_key: None,
            timeout: Duration::from_secs(60),
            priority: 0,
            rate_limit: None,
        }
    }

    /// Set the credential.
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(SecretString::new(api_key.into()));
        self
    }

    /// Set the request deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the selection priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the rate limit policy.
    #[must_use]
    pub fn with_rate_limit(mut self, max_requests: u32, window: Duration) -> Self {
        self.rate_limit = Some(RateLimitPolicy {
            max_requests,
            window,
        });
        self
    }

    /// Whether rate limiting is in effect for this backend.
    #[must_use]
    pub fn has_rate_limit(&self) -> bool {
        self.rate_limit.is_some_and(|policy| policy.max_requests > 0)
    }
}
