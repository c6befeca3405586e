//! Bearer-key authentication with per-key usage metrics.
//!
//! Keys come from the environment: a single `AUTH_KEY`, or the numbered
//! sequence `AUTH_KEY_01`, `AUTH_KEY_02`, ... (stopping at the first gap).
//! When no keys are configured, authentication is a no-op even if enabled.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use dashmap::DashMap;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use tracing::{info, warn};

/// Authentication gate and per-key request metrics.
#[derive(Debug, Default)]
pub struct AuthService {
    valid_keys: HashSet<String>,
    enabled: bool,
    metrics: DashMap<String, KeyMetrics>,
}

#[derive(Debug, Default)]
struct KeyMetrics {
    requests_count: u64,
    success_count: u64,
    error_count: u64,
    first_request: Option<f64>,
    last_request: Option<f64>,
}

impl AuthService {
    /// Load keys from the environment.
    #[must_use]
    pub fn from_env(enabled: bool) -> Self {
        Self::from_lookup(enabled, |var| std::env::var(var).ok())
    }

    /// Load keys via an environment-style lookup.
    #[must_use]
    pub fn from_lookup(enabled: bool, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut valid_keys = HashSet::new();

        if let Some(key) = lookup("AUTH_KEY") {
            valid_keys.insert(key.trim().to_string());
            info!("Loaded single AUTH_KEY");
        } else {
            let mut index = 1;
            while let Some(key) = lookup(&format!("AUTH_KEY_{index:02}")) {
                valid_keys.insert(key.trim().to_string());
                index += 1;
            }
            if valid_keys.is_empty() {
                if enabled {
                    warn!("Authentication enabled but no keys found in environment");
                }
            } else {
                info!(keys = valid_keys.len(), "Loaded authentication keys");
            }
        }

        Self {
            valid_keys,
            enabled,
            metrics: DashMap::new(),
        }
    }

    /// Build from explicit keys.
    #[must_use]
    pub fn from_keys(enabled: bool, keys: impl IntoIterator<Item = String>) -> Self {
        Self {
            valid_keys: keys.into_iter().collect(),
            enabled,
            metrics: DashMap::new(),
        }
    }

    /// Whether requests must present a valid key.
    #[must_use]
    pub fn requires_auth(&self) -> bool {
        self.enabled && !self.valid_keys.is_empty()
    }

    /// Check a raw Authorization header value (with or without `Bearer `).
    #[must_use]
    pub fn is_valid_key(&self, raw: &str) -> bool {
        let key = strip_bearer(raw);
        !key.is_empty() && self.valid_keys.contains(key)
    }

    /// Record a request outcome for the key.
    pub fn record_request(&self, raw: &str, success: bool) {
        let key = strip_bearer(raw);
        if key.is_empty() {
            return;
        }

        let now = Utc::now().timestamp_millis() as f64 / 1000.0;
        let mut metrics = self.metrics.entry(key.to_string()).or_default();
        metrics.requests_count += 1;
        metrics.last_request = Some(now);
        if metrics.first_request.is_none() {
            metrics.first_request = Some(now);
        }
        if success {
            metrics.success_count += 1;
        } else {
            metrics.error_count += 1;
        }
    }

    /// Aggregate usage metrics, with keys masked.
    #[must_use]
    pub fn metrics(&self) -> Value {
        let mut total_requests = 0u64;
        let mut total_success = 0u64;
        let mut total_errors = 0u64;
        let mut key_metrics = BTreeMap::new();

        for entry in self.metrics.iter() {
            total_requests += entry.requests_count;
            total_success += entry.success_count;
            total_errors += entry.error_count;

            let success_rate =
                entry.success_count as f64 / entry.requests_count.max(1) as f64 * 100.0;
            key_metrics.insert(
                mask_key(entry.key()),
                json!({
                    "requests_count": entry.requests_count,
                    "success_count": entry.success_count,
                    "error_count": entry.error_count,
                    "first_request": entry.first_request,
                    "last_request": entry.last_request,
                    "success_rate": success_rate,
                }),
            );
        }

        json!({
            "valid_keys_count": self.valid_keys.len(),
            "total_requests": total_requests,
            "total_success": total_success,
            "total_errors": total_errors,
            "success_rate": total_success as f64 / total_requests.max(1) as f64 * 100.0,
            "keys_metrics": key_metrics,
            "active_keys": self.metrics.len(),
        })
    }
}

fn strip_bearer(raw: &str) -> &str {
    raw.strip_prefix("Bearer ").unwrap_or(raw).trim()
}

/// Mask a key for display: first and last four characters.
fn mask_key(key: &str) -> String {
    if key.len() > 8 {
        format!("{}...{}", &key[..4], &key[key.len() - 4..])
    } else if key.len() > 4 {
        format!("{}...{}", &key[..2], &key[key.len() - 2..])
    } else {
        "****".to_string()
    }
}

/// Axum middleware gating the OpenAI-compatible routes.
pub async fn auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if !state.auth.requires_auth() {
        return next.run(request).await;
    }

    let header_value = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string);

    let Some(raw) = header_value else {
        return ApiError::unauthorized("Missing Authorization header").into_response();
    };

    if !state.auth.is_valid_key(&raw) {
        state.auth.record_request(&raw, false);
        return ApiError::unauthorized("Incorrect API key provided").into_response();
    }

    let response = next.run(request).await;
    state
        .auth
        .record_request(&raw, response.status().is_success());
    response
}
