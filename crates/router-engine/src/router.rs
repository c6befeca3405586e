//! The selection and failover engine.
//!
//! Per request the engine walks the configured backends in priority order,
//! skipping saturated ones, disqualifying those whose capability cache rules
//! out every requested model, and failing over on upstream errors until a
//! backend answers or every candidate is exhausted.

use crate::capability::ModelCache;
use crate::chain::FallbackChain;
use crate::limiter::RateLimiter;
use crate::stats::{
    classify, percentage, BackendHealth, BackendStats, HealthReport, HealthState, RateLimitConfig,
    RouterCounters, StatsReport,
};
use chrono::Utc;
use router_core::{
    ChatBackend, ChatCompletionRequest, ChatCompletionResponse, FrameStream, ModelList,
    RouterError, RouterResult, RoutingMetadata,
};
use router_config::BackendConfig;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// One configured backend with its adapter.
struct BackendEntry {
    config: BackendConfig,
    adapter: Arc<dyn ChatBackend>,
}

/// Outcome of a routed chat completion, by the request's `stream` flag.
pub enum ChatOutcome {
    /// A complete response with embedded routing metadata.
    Complete(Box<ChatCompletionResponse>),
    /// A live stream of canonical SSE frames plus its routing metadata.
    Streaming {
        /// Provenance of the selected attempt.
        metadata: RoutingMetadata,
        /// Canonical frames, finite and cancelable by drop.
        frames: FrameStream,
    },
}

/// Router over multiple OpenAI-compatible backends with automatic failover.
pub struct Router {
    backends: Vec<BackendEntry>,
    limiter: RateLimiter,
    cache: ModelCache,
    counters: RouterCounters,
}

impl Router {
    /// Build a router from backend descriptors and their adapters.
    ///
    /// Backends are ordered ascending by priority for the router's entire
    /// lifetime; declaration order breaks ties.
    ///
    /// # Errors
    /// Returns a configuration error when no backends are supplied.
    pub fn new(backends: Vec<(BackendConfig, Arc<dyn ChatBackend>)>) -> RouterResult<Self> {
        Self::with_cache(backends, ModelCache::default())
    }

    /// Build a router with a custom capability cache (e.g. a shorter TTL).
    pub fn with_cache(
        backends: Vec<(BackendConfig, Arc<dyn ChatBackend>)>,
        cache: ModelCache,
    ) -> RouterResult<Self> {
        if backends.is_empty() {
            return Err(RouterError::Configuration(
                "at least one backend configuration is required".to_string(),
            ));
        }

        let mut entries: Vec<BackendEntry> = backends
            .into_iter()
            .map(|(config, adapter)| BackendEntry { config, adapter })
            .collect();
        entries.sort_by_key(|entry| entry.config.priority);

        for entry in &entries {
            info!(
                backend = %entry.config.name,
                backend_type = %entry.config.backend_type,
                priority = entry.config.priority,
                "Registered backend"
            );
        }

        let counters =
            RouterCounters::new(entries.iter().map(|entry| entry.config.name.clone()));

        Ok(Self {
            backends: entries,
            limiter: RateLimiter::new(),
            cache,
            counters,
        })
    }

    /// Configured backend descriptors in priority order.
    pub fn descriptors(&self) -> impl Iterator<Item = &BackendConfig> {
        self.backends.iter().map(|entry| &entry.config)
    }

    /// Backend names in priority order.
    pub fn backend_names(&self) -> Vec<String> {
        self.backends
            .iter()
            .map(|entry| entry.config.name.clone())
            .collect()
    }

    /// Execute a chat completion with rate limiting and automatic failover.
    ///
    /// The request's model string may carry a pipe-delimited fallback chain;
    /// each backend is matched against the first chain option its capability
    /// cache accepts.
    pub async fn chat_completion(
        &self,
        request: &ChatCompletionRequest,
    ) -> RouterResult<ChatOutcome> {
        self.counters.record_request();

        let chain = FallbackChain::parse(&request.model);
        debug!(options = ?chain.options(), "Parsed model options");

        self.refresh_stale_caches().await;

        let total = self.backends.len();
        let mut attempted: HashSet<String> = HashSet::new();
        let mut last_error: Option<RouterError> = None;

        while attempted.len() < total {
            let selected = self.select_candidate(&chain, &mut attempted);

            let Some((index, model)) = selected else {
                // No candidate survived the scan. Everything left untried is
                // saturated (vacuously so when nothing is left untried);
                // otherwise a window expired mid-scan and the loop ends here.
                if self.all_remaining_rate_limited(&attempted) {
                    error!("All backends are rate limited or exhausted");
                    return Err(RouterError::AllBackendsRateLimited {
                        attempted: attempted.len(),
                        total,
                    });
                }
                break;
            };

            let entry = &self.backends[index];
            let name = entry.config.name.clone();
            let attempt = attempted.len() + 1;

            info!(
                backend = %name,
                model = %model,
                attempt = attempt,
                total = total,
                "Attempting chat completion"
            );

            // The attempt counts against quota regardless of outcome, so the
            // window records it before the call goes out.
            self.limiter.record(&name);
            self.counters.record_backend_request(&name);

            let concrete_request = request.with_model(model.as_str());
            let start = Instant::now();

            let failure = if request.stream {
                match entry.adapter.chat_completion_stream(&concrete_request).await {
                    Ok(frames) => {
                        let metadata =
                            self.metadata(index, attempt, start.elapsed(), request, &model, &chain);
                        info!(backend = %name, model = %model, "Streaming chat completion established");
                        return Ok(ChatOutcome::Streaming { metadata, frames });
                    }
                    Err(e) => e,
                }
            } else {
                match entry.adapter.chat_completion(&concrete_request).await {
                    Ok(mut response) => {
                        let duration = start.elapsed();
                        info!(
                            backend = %name,
                            model = %model,
                            duration_ms = duration.as_millis(),
                            "Chat completion successful"
                        );
                        response.router = Some(self.metadata(
                            index, attempt, duration, request, &model, &chain,
                        ));
                        return Ok(ChatOutcome::Complete(Box::new(response)));
                    }
                    Err(e) => e,
                }
            };

            warn!(backend = %name, error = %failure, "Backend attempt failed");
            self.counters.record_backend_failure(&name);
            attempted.insert(name);
            last_error = Some(failure);

            if attempted.len() < total {
                self.counters.record_failover();
                info!("Failing over to next available backend");
            }
        }

        error!(
            total = total,
            attempted = attempted.len(),
            "All backends failed or are unavailable"
        );

        match last_error {
            Some(error) => Err(error),
            None => Err(RouterError::NoCapableBackend {
                requested: request.model.clone(),
            }),
        }
    }

    /// Scan backends in priority order for the first eligible candidate.
    ///
    /// Rate-limited backends are skipped without being marked attempted (the
    /// window may drain later); capability-disqualified backends are marked
    /// attempted immediately since nothing will change for this request.
    fn select_candidate(
        &self,
        chain: &FallbackChain,
        attempted: &mut HashSet<String>,
    ) -> Option<(usize, String)> {
        for (index, entry) in self.backends.iter().enumerate() {
            let name = &entry.config.name;
            if attempted.contains(name) {
                continue;
            }

            if let Some(policy) = entry.config.rate_limit.filter(|p| p.max_requests > 0) {
                if self.limiter.is_limited(name, &policy) {
                    self.counters.record_backend_rate_limited(name);
                    info!(backend = %name, "Skipping rate limited backend");
                    // Only the first scan of a request counts toward the
                    // global skip total; later rounds of the same request
                    // repeat the same observation.
                    if attempted.is_empty() {
                        self.counters.record_rate_limit_skip();
                    }
                    continue;
                }
            }

            match self.cache.best_supported(name, chain) {
                None => {
                    info!(
                        backend = %name,
                        options = ?chain.options(),
                        "Skipping backend that supports none of the requested models"
                    );
                    attempted.insert(name.clone());
                }
                Some(model) => {
                    debug!(backend = %name, model = %model, "Selected backend");
                    return Some((index, model));
                }
            }
        }
        None
    }

    fn all_remaining_rate_limited(&self, attempted: &HashSet<String>) -> bool {
        self.backends.iter().all(|entry| {
            if attempted.contains(&entry.config.name) {
                return true;
            }
            entry
                .config
                .rate_limit
                .filter(|p| p.max_requests > 0)
                .is_some_and(|policy| self.limiter.is_limited(&entry.config.name, &policy))
        })
    }

    fn metadata(
        &self,
        index: usize,
        attempt: usize,
        duration: Duration,
        request: &ChatCompletionRequest,
        model: &str,
        chain: &FallbackChain,
    ) -> RoutingMetadata {
        let entry = &self.backends[index];
        RoutingMetadata {
            service: entry.config.name.clone(),
            attempt,
            duration: (duration.as_secs_f64() * 1000.0).round() / 1000.0,
            backend_type: entry.config.backend_type,
            requested_model: request.model.clone(),
            actual_model: model.to_string(),
            model_options: chain.options().to_vec(),
        }
    }

    /// Refresh the capability cache for every backend whose entry is missing
    /// or stale. Listing failures degrade to the adapter's fallback catalog,
    /// so one backend can never block refreshing another.
    async fn refresh_stale_caches(&self) {
        for entry in &self.backends {
            let name = &entry.config.name;
            if !self.cache.is_fresh(name) {
                debug!(backend = %name, "Refreshing model cache");
                let models = entry.adapter.list_models().await;
                self.cache.update(name, models.model_ids());
            }
        }
    }

    /// List models from all backends, tagged with their origin.
    ///
    /// Merges every backend's listing (each adapter already degrades to its
    /// static catalog on failure) and updates the capability cache as a side
    /// effect. OpenAI-standard fields pass through untouched.
    pub async fn list_models(&self) -> ModelList {
        let mut combined: Vec<Value> = Vec::new();
        let mut listed = Vec::new();

        for entry in &self.backends {
            let name = &entry.config.name;
            let models = entry.adapter.list_models().await;

            for model in &models.data {
                combined.push(tag_model(model, name, entry.config.backend_type.as_str()));
            }

            listed.push(json!({
                "name": name,
                "backend_type": entry.config.backend_type,
                "models_count": models.data.len(),
            }));

            self.cache.update(name, models.model_ids());
            info!(backend = %name, models = models.data.len(), "Retrieved models");
        }

        if combined.is_empty() {
            warn!("No backend returned any model, using combined fallback catalog");
            return self.combined_fallback_models();
        }

        let mut merged = ModelList::new(combined);
        merged.router = Some(json!({
            "services": listed,
            "total_services": self.backends.len(),
            "working_services": listed.len(),
            "combined_models": merged.data.len(),
        }));
        merged
    }

    /// Merged static catalogs from every configured backend type.
    fn combined_fallback_models(&self) -> ModelList {
        let created = Utc::now().timestamp();
        let mut combined = Vec::new();

        for entry in &self.backends {
            for model in entry.config.backend_type.profile().fallback_models {
                let raw = json!({
                    "id": model.id,
                    "object": "model",
                    "created": created,
                    "owned_by": model.owned_by,
                });
                combined.push(tag_model(
                    &raw,
                    &entry.config.name,
                    entry.config.backend_type.as_str(),
                ));
            }
        }

        let mut list = ModelList::new(combined);
        list.router = Some(json!({
            "service": "combined_fallback",
            "attempt": self.backends.len(),
            "backend_type": "fallback",
        }));
        list
    }

    /// Cumulative statistics plus live rate-limit occupancy.
    pub fn stats(&self) -> StatsReport {
        let (requests, failovers, skips) = self.counters.totals();

        let mut backend_stats = BTreeMap::new();
        let mut rate_limiting = BTreeMap::new();
        for entry in &self.backends {
            let name = &entry.config.name;
            let (backend_requests, failures, rate_limited) =
                self.counters.backend_snapshot(name);
            backend_stats.insert(
                name.clone(),
                BackendStats {
                    requests: backend_requests,
                    failures,
                    rate_limited,
                },
            );
            rate_limiting.insert(
                name.clone(),
                self.limiter.status(name, entry.config.rate_limit.as_ref()),
            );
        }

        StatsReport {
            total_requests: requests,
            total_failovers: failovers,
            total_rate_limit_skips: skips,
            failover_rate: percentage(failovers, requests),
            rate_limit_skip_rate: percentage(skips, requests),
            configured_backends: self.backends.len(),
            backend_stats,
            backend_order: self.backend_names(),
            rate_limiting,
        }
    }

    /// Health classification for every backend and the process overall.
    pub fn health(&self) -> HealthReport {
        let mut backends = BTreeMap::new();
        let mut unhealthy = 0usize;

        for entry in &self.backends {
            let name = &entry.config.name;
            let (requests, failures, rate_limited) = self.counters.backend_snapshot(name);
            let status = classify(requests, failures);
            if status == HealthState::Unhealthy {
                unhealthy += 1;
            }

            let is_currently_rate_limited = entry
                .config
                .rate_limit
                .filter(|p| p.max_requests > 0)
                .is_some_and(|policy| self.limiter.is_limited(name, &policy));

            backends.insert(
                name.clone(),
                BackendHealth {
                    status,
                    backend_type: entry.config.backend_type,
                    base_url: entry.adapter.base_url().to_string(),
                    has_api_key: entry.adapter.has_api_key(),
                    requests,
                    failures,
                    failure_rate: if requests > 0 {
                        percentage(failures, requests)
                    } else {
                        0.0
                    },
                    rate_limited_events: rate_limited,
                    is_currently_rate_limited,
                    rate_limit_config: entry.config.rate_limit.map(|policy| RateLimitConfig {
                        max_requests: policy.max_requests,
                        window_seconds: policy.window.as_secs(),
                    }),
                },
            );
        }

        let overall_status = if unhealthy == self.backends.len() {
            HealthState::Unhealthy
        } else if unhealthy > 0 {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        };

        HealthReport {
            overall_status,
            backends,
        }
    }

    /// Zero all counters and clear the limiter windows.
    ///
    /// The capability cache and backend descriptors are untouched.
    pub fn reset_stats(&self) {
        self.counters.reset();
        self.limiter.clear();
        info!("Router statistics reset");
    }

    #[cfg(test)]
    pub(crate) fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    #[cfg(test)]
    pub(crate) fn cache(&self) -> &ModelCache {
        &self.cache
    }
}

/// Copy a model entry and tag it with its originating backend, leaving the
/// OpenAI-standard fields unmodified.
fn tag_model(model: &Value, service: &str, backend_type: &str) -> Value {
    let mut tagged = model.clone();
    if let Some(object) = tagged.as_object_mut() {
        object.insert("service".to_string(), Value::String(service.to_string()));
        object.insert(
            "backend_type".to_string(),
            Value::String(backend_type.to_string()),
        );
    }
    tagged
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures_util::TryStreamExt;
    use router_core::{BackendType, ChatMessage, Choice, ResponseMessage, Usage};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone)]
    enum Behavior {
        Succeed,
        FailApi { status: u16, message: String },
    }

    struct MockBackend {
        name: String,
        backend_type: BackendType,
        models: Vec<String>,
        behavior: Behavior,
        calls: AtomicUsize,
    }

    impl MockBackend {
        fn new(name: &str, models: &[&str]) -> Self {
            Self {
                name: name.to_string(),
                backend_type: BackendType::Custom,
                models: models.iter().map(ToString::to_string).collect(),
                behavior: Behavior::Succeed,
                calls: AtomicUsize::new(0),
            }
        }

        fn failing(name: &str, models: &[&str], status: u16, message: &str) -> Self {
            Self {
                behavior: Behavior::FailApi {
                    status,
                    message: message.to_string(),
                },
                ..Self::new(name, models)
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChatBackend for MockBackend {
        fn backend_type(&self) -> BackendType {
            self.backend_type
        }

        fn base_url(&self) -> &str {
            "http://mock.local/v1"
        }

        fn has_api_key(&self) -> bool {
            false
        }

        async fn chat_completion(
            &self,
            request: &ChatCompletionRequest,
        ) -> Result<ChatCompletionResponse, RouterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behavior {
                Behavior::Succeed => Ok(ChatCompletionResponse {
                    id: "chatcmpl-mock".to_string(),
                    object: "chat.completion".to_string(),
                    created: 1_700_000_000,
                    model: request.model.clone(),
                    choices: vec![Choice {
                        index: 0,
                        message: ResponseMessage {
                            role: "assistant".to_string(),
                            content: format!("reply from {}", self.name),
                        },
                        finish_reason: Some("stop".to_string()),
                    }],
                    usage: Usage::default(),
                    router: None,
                }),
                Behavior::FailApi { status, message } => Err(RouterError::UpstreamApi {
                    backend: self.name.clone(),
                    status: *status,
                    message: message.clone(),
                }),
            }
        }

        async fn chat_completion_stream(
            &self,
            request: &ChatCompletionRequest,
        ) -> Result<FrameStream, RouterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behavior {
                Behavior::Succeed => {
                    let frames = vec![
                        Ok(Bytes::from(format!(
                            "data: {{\"id\":\"chatcmpl-mock\",\"object\":\"chat.completion.chunk\",\"model\":\"{}\",\"choices\":[{{\"index\":0,\"delta\":{{\"content\":\"hi\"}},\"finish_reason\":null}}]}}\n\n",
                            request.model
                        ))),
                        Ok(Bytes::from_static(b"data: [DONE]\n\n")),
                    ];
                    Ok(Box::pin(futures::stream::iter(frames)))
                }
                Behavior::FailApi { status, message } => Err(RouterError::UpstreamApi {
                    backend: self.name.clone(),
                    status: *status,
                    message: message.clone(),
                }),
            }
        }

        async fn list_models(&self) -> ModelList {
            let data = self
                .models
                .iter()
                .map(|id| {
                    json!({"id": id, "object": "model", "created": 1_700_000_000, "owned_by": self.name})
                })
                .collect();
            ModelList::new(data)
        }
    }

    fn config(name: &str, priority: i32) -> BackendConfig {
        BackendConfig::new(name, BackendType::Custom, "http://mock.local/v1")
            .with_priority(priority)
    }

    fn build_router(entries: Vec<(BackendConfig, Arc<MockBackend>)>) -> Router {
        Router::new(
            entries
                .into_iter()
                .map(|(config, mock)| (config, mock as Arc<dyn ChatBackend>))
                .collect(),
        )
        .unwrap()
    }

    fn request(model: &str) -> ChatCompletionRequest {
        ChatCompletionRequest::new(model, vec![ChatMessage::user("Hello")])
    }

    fn complete(outcome: ChatOutcome) -> ChatCompletionResponse {
        match outcome {
            ChatOutcome::Complete(response) => *response,
            ChatOutcome::Streaming { .. } => panic!("expected a complete response"),
        }
    }

    #[test]
    fn test_new_rejects_empty_backend_list() {
        assert!(matches!(
            Router::new(vec![]),
            Err(RouterError::Configuration(_))
        ));
    }

    #[test]
    fn test_backends_sorted_by_priority() {
        let router = build_router(vec![
            (config("low", 5), Arc::new(MockBackend::new("low", &[]))),
            (config("high", 0), Arc::new(MockBackend::new("high", &[]))),
            (config("mid", 2), Arc::new(MockBackend::new("mid", &[]))),
        ]);
        assert_eq!(router.backend_names(), vec!["high", "mid", "low"]);
    }

    #[tokio::test]
    async fn test_single_backend_success_attaches_metadata() {
        let primary = Arc::new(MockBackend::new("primary", &["m1"]));
        let router = build_router(vec![(config("primary", 0), primary.clone())]);

        let response = complete(router.chat_completion(&request("m1")).await.unwrap());
        let metadata = response.router.unwrap();
        assert_eq!(metadata.service, "primary");
        assert_eq!(metadata.attempt, 1);
        assert_eq!(metadata.requested_model, "m1");
        assert_eq!(metadata.actual_model, "m1");
        assert_eq!(metadata.model_options, vec!["m1"]);
        assert_eq!(primary.calls(), 1);
    }

    #[tokio::test]
    async fn test_fallback_chain_resolves_per_backend() {
        // First backend supports only "b", second only "c": the chain a|b|c
        // must select the higher-priority backend with concrete model "b".
        let first = Arc::new(MockBackend::new("first", &["b"]));
        let second = Arc::new(MockBackend::new("second", &["c"]));
        let router = build_router(vec![
            (config("first", 0), first.clone()),
            (config("second", 1), second.clone()),
        ]);

        let response = complete(router.chat_completion(&request("a|b|c")).await.unwrap());
        let metadata = response.router.unwrap();
        assert_eq!(metadata.service, "first");
        assert_eq!(metadata.actual_model, "b");
        assert_eq!(metadata.requested_model, "a|b|c");
        assert_eq!(metadata.model_options, vec!["a", "b", "c"]);
        assert_eq!(second.calls(), 0);
    }

    #[tokio::test]
    async fn test_failover_to_next_backend() {
        let first = Arc::new(MockBackend::failing("first", &["m1"], 503, "down"));
        let second = Arc::new(MockBackend::new("second", &["m1"]));
        let router = build_router(vec![
            (config("first", 0), first.clone()),
            (config("second", 1), second.clone()),
        ]);

        let response = complete(router.chat_completion(&request("m1")).await.unwrap());
        let metadata = response.router.unwrap();
        assert_eq!(metadata.service, "second");
        assert_eq!(metadata.attempt, 2);

        let stats = router.stats();
        assert_eq!(stats.total_failovers, 1);
        assert_eq!(stats.backend_stats["first"].failures, 1);
        assert_eq!(stats.backend_stats["second"].failures, 0);
    }

    #[tokio::test]
    async fn test_all_backends_fail_surfaces_last_error() {
        let first = Arc::new(MockBackend::failing("first", &["m1"], 500, "first down"));
        let second = Arc::new(MockBackend::failing("second", &["m1"], 502, "second down"));
        let third = Arc::new(MockBackend::failing("third", &["m1"], 503, "third down"));
        let router = build_router(vec![
            (config("first", 0), first),
            (config("second", 1), second),
            (config("third", 2), third),
        ]);

        let err = match router.chat_completion(&request("m1")).await {
            Ok(_) => panic!("expected error"),
            Err(e) => e,
        };
        match err {
            RouterError::UpstreamApi {
                backend,
                status,
                message,
            } => {
                assert_eq!(backend, "third");
                assert_eq!(status, 503);
                assert_eq!(message, "third down");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // The final failure does not count as a failover.
        assert_eq!(router.stats().total_failovers, 2);
    }

    #[tokio::test]
    async fn test_rate_limited_backend_skipped_and_counted_once() {
        let mut limited_config = config("limited", 0);
        limited_config = limited_config.with_rate_limit(1, Duration::from_secs(60));

        let limited = Arc::new(MockBackend::new("limited", &["m1"]));
        let fallback = Arc::new(MockBackend::new("fallback", &["m1"]));
        let third = Arc::new(MockBackend::new("third", &["m1"]));
        let router = build_router(vec![
            (limited_config, limited.clone()),
            (config("fallback", 1), fallback.clone()),
            (config("third", 2), third.clone()),
        ]);

        // Saturate the first backend's window.
        router.limiter().record("limited");

        let response = complete(router.chat_completion(&request("m1")).await.unwrap());
        assert_eq!(response.router.unwrap().service, "fallback");
        assert_eq!(limited.calls(), 0);

        let stats = router.stats();
        assert_eq!(stats.total_rate_limit_skips, 1);
        assert_eq!(stats.backend_stats["limited"].rate_limited, 1);
    }

    #[tokio::test]
    async fn test_all_backends_rate_limited() {
        let limited_config =
            config("only", 0).with_rate_limit(1, Duration::from_secs(60));
        let only = Arc::new(MockBackend::new("only", &["m1"]));
        let router = build_router(vec![(limited_config, only.clone())]);

        router.limiter().record("only");

        let err = match router.chat_completion(&request("m1")).await {
            Ok(_) => panic!("expected error"),
            Err(e) => e,
        };
        match err {
            RouterError::AllBackendsRateLimited { attempted, total } => {
                assert_eq!(attempted, 0);
                assert_eq!(total, 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(only.calls(), 0);
        assert_eq!(router.stats().total_rate_limit_skips, 1);
    }

    #[tokio::test]
    async fn test_all_backends_capability_disqualified() {
        // Every backend advertises models that never match the request. The
        // scan disqualifies them all, and the exhaustion check (over an empty
        // remainder) reports rate-limit exhaustion, mirroring the observed
        // boundary between the error kinds.
        let first = Arc::new(MockBackend::new("first", &["other"]));
        let second = Arc::new(MockBackend::new("second", &["different"]));
        let router = build_router(vec![
            (config("first", 0), first.clone()),
            (config("second", 1), second.clone()),
        ]);

        let err = match router.chat_completion(&request("m1")).await {
            Ok(_) => panic!("expected error"),
            Err(e) => e,
        };
        match err {
            RouterError::AllBackendsRateLimited { attempted, total } => {
                assert_eq!(attempted, 2);
                assert_eq!(total, 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(first.calls(), 0);
        assert_eq!(second.calls(), 0);
    }

    #[tokio::test]
    async fn test_streaming_outcome_carries_metadata_and_frames() {
        let primary = Arc::new(MockBackend::new("primary", &["m1"]));
        let router = build_router(vec![(config("primary", 0), primary)]);

        let mut streaming_request = request("m1");
        streaming_request.stream = true;

        match router.chat_completion(&streaming_request).await.unwrap() {
            ChatOutcome::Streaming { metadata, frames } => {
                assert_eq!(metadata.service, "primary");
                assert_eq!(metadata.actual_model, "m1");

                let frames: Vec<Bytes> = frames.try_collect().await.unwrap();
                assert_eq!(frames.len(), 2);
                assert_eq!(&frames[1][..], b"data: [DONE]\n\n");
            }
            ChatOutcome::Complete(_) => panic!("expected a streaming outcome"),
        }
    }

    #[tokio::test]
    async fn test_streaming_failure_fails_over_before_first_frame() {
        let first = Arc::new(MockBackend::failing("first", &["m1"], 500, "down"));
        let second = Arc::new(MockBackend::new("second", &["m1"]));
        let router = build_router(vec![
            (config("first", 0), first),
            (config("second", 1), second),
        ]);

        let mut streaming_request = request("m1");
        streaming_request.stream = true;

        match router.chat_completion(&streaming_request).await.unwrap() {
            ChatOutcome::Streaming { metadata, .. } => {
                assert_eq!(metadata.service, "second");
                assert_eq!(metadata.attempt, 2);
            }
            ChatOutcome::Complete(_) => panic!("expected a streaming outcome"),
        }
    }

    #[tokio::test]
    async fn test_list_models_tags_entries_and_updates_cache() {
        let first = Arc::new(MockBackend::new("first", &["m1", "m2"]));
        let second = Arc::new(MockBackend::new("second", &["m3"]));
        let router = build_router(vec![
            (config("first", 0), first),
            (config("second", 1), second),
        ]);

        let merged = router.list_models().await;
        assert_eq!(merged.data.len(), 3);
        for entry in &merged.data {
            let object = entry.as_object().unwrap();
            // OpenAI-standard fields untouched, router tags added.
            assert!(object.contains_key("id"));
            assert_eq!(object["object"], "model");
            assert!(object.contains_key("created"));
            assert!(object.contains_key("owned_by"));
            assert!(object.contains_key("service"));
            assert_eq!(object["backend_type"], "custom");
        }
        let provenance = merged.router.unwrap();
        assert_eq!(provenance["total_services"], 2);
        assert_eq!(provenance["working_services"], 2);
        assert_eq!(provenance["combined_models"], 3);

        assert_eq!(router.cache().cached_model_count("first"), Some(2));
        assert_eq!(router.cache().cached_model_count("second"), Some(1));

        // Idempotence: unchanged upstreams yield identical merged output.
        let again = router.list_models().await;
        assert_eq!(
            serde_json::to_value(&again.data).unwrap(),
            serde_json::to_value(&merged.data).unwrap()
        );
        assert_eq!(router.cache().cached_model_count("first"), Some(2));
    }

    #[tokio::test]
    async fn test_health_classification() {
        let good = Arc::new(MockBackend::new("good", &["m1"]));
        let bad = Arc::new(MockBackend::failing("bad", &["m1"], 500, "down"));
        let router = build_router(vec![
            (config("bad", 0), bad),
            (config("good", 1), good),
        ]);

        // One request: "bad" fails once, "good" serves it.
        let _ = router.chat_completion(&request("m1")).await.unwrap();

        let health = router.health();
        assert_eq!(health.backends["bad"].status, HealthState::Unhealthy);
        assert_eq!(health.backends["good"].status, HealthState::Healthy);
        assert_eq!(health.overall_status, HealthState::Degraded);
    }

    #[tokio::test]
    async fn test_health_unknown_before_any_request() {
        let idle = Arc::new(MockBackend::new("idle", &["m1"]));
        let router = build_router(vec![(config("idle", 0), idle)]);

        let health = router.health();
        assert_eq!(health.backends["idle"].status, HealthState::Unknown);
        assert_eq!(health.overall_status, HealthState::Healthy);
    }

    #[tokio::test]
    async fn test_reset_stats_clears_counters_and_windows_but_not_cache() {
        let limited_config =
            config("primary", 0).with_rate_limit(1, Duration::from_secs(60));
        let primary = Arc::new(MockBackend::new("primary", &["m1"]));
        let router = build_router(vec![(limited_config, primary)]);

        let _ = router.chat_completion(&request("m1")).await.unwrap();
        assert_eq!(router.stats().total_requests, 1);
        assert!(router
            .stats()
            .rate_limiting["primary"]
            .is_rate_limited);
        assert_eq!(router.cache().cached_model_count("primary"), Some(1));

        router.reset_stats();

        let stats = router.stats();
        assert_eq!(stats.total_requests, 0);
        assert_eq!(stats.total_failovers, 0);
        assert_eq!(stats.total_rate_limit_skips, 0);
        assert_eq!(stats.backend_stats["primary"].requests, 0);
        assert!(!stats.rate_limiting["primary"].is_rate_limited);
        // The capability cache survives the reset.
        assert_eq!(router.cache().cached_model_count("primary"), Some(1));
    }

    #[tokio::test]
    async fn test_stats_report_shape() {
        let primary = Arc::new(MockBackend::new("primary", &["m1"]));
        let router = build_router(vec![(config("primary", 0), primary)]);

        let _ = router.chat_completion(&request("m1")).await.unwrap();

        let stats = router.stats();
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.configured_backends, 1);
        assert_eq!(stats.backend_order, vec!["primary"]);
        assert_eq!(stats.backend_stats["primary"].requests, 1);
        assert_eq!(stats.rate_limiting["primary"].rate_limit, "none");
        assert!((stats.failover_rate - 0.0).abs() < f64::EPSILON);
    }
}
