//! Settings assembly from files and environment variables.

use crate::backend::{default_window, BackendConfig, RateLimitPolicy};
use router_core::BackendType;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

/// Environment variable naming the YAML config file.
pub const CONFIG_PATH_VAR: &str = "ROUTER_CONFIG_PATH";

/// Environment variable carrying the JSON backend list.
pub const SERVICES_VAR: &str = "ROUTER_SERVICES";

/// Errors produced while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file '{path}': {source}")]
    Io {
        /// Path that failed to read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The config content could not be parsed.
    #[error("failed to parse configuration: {0}")]
    Parse(String),

    /// A backend entry is invalid.
    #[error("invalid backend '{name}': {message}")]
    InvalidBackend {
        /// Backend name.
        name: String,
        /// What is wrong with it.
        message: String,
    },

    /// No backend could be assembled from any source.
    #[error("no backends are configured")]
    NoBackends,
}

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Host the HTTP server binds to.
    pub host: String,
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Default per-backend request deadline.
    pub request_timeout: Duration,
    /// Whether bearer-key authentication gates the `/v1` routes.
    pub enable_auth: bool,
    /// Configured backends, in declaration order (the engine sorts by priority).
    pub backends: Vec<BackendConfig>,
}

impl Settings {
    /// Load settings from `ROUTER_CONFIG_PATH` if set, else from the environment.
    pub async fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var(CONFIG_PATH_VAR) {
            info!(path = %path, "Loading configuration file");
            let text = tokio::fs::read_to_string(&path)
                .await
                .map_err(|source| ConfigError::Io { path, source })?;
            return Self::from_yaml(&text, |var| std::env::var(var).ok());
        }
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Assemble settings from a YAML document.
    ///
    /// `lookup` resolves `api_key_env` references so credentials can stay out
    /// of the file.
    pub fn from_yaml(
        text: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let file: FileConfig =
            serde_yaml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;

        let mut backends = Vec::with_capacity(file.backends.len());
        for entry in file.backends {
            let api_key = entry
                .api_key
                .or_else(|| entry.api_key_env.as_deref().and_then(&lookup));

            let mut backend = BackendConfig::new(entry.name, entry.backend_type, entry.base_url)
                .with_timeout(entry.timeout.unwrap_or(file.request_timeout))
                .with_priority(entry.priority);
            if let Some(key) = api_key {
                backend = backend.with_api_key(key);
            }
            backend.rate_limit = entry.rate_limit;

            validate_backend(&backend)?;
            backends.push(backend);
        }

        if backends.is_empty() {
            return Err(ConfigError::NoBackends);
        }

        Ok(Self {
            host: file.host,
            port: file.port,
            request_timeout: file.request_timeout,
            enable_auth: file.enable_auth,
            backends,
        })
    }

    /// Assemble settings from environment-style key lookups.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = lookup("PORT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(8000);
        let request_timeout = lookup("REQUEST_TIMEOUT")
            .and_then(|v| v.parse().ok())
            .map_or(Duration::from_secs(60), Duration::from_secs);
        let enable_auth = lookup("ENABLE_AUTH")
            .map_or(true, |v| !matches!(v.as_str(), "false" | "0" | "no"));

        let backends = match lookup(SERVICES_VAR) {
            Some(json) if !json.is_empty() => match parse_services_json(&json, request_timeout) {
                Ok(backends) => backends,
                Err(e) => {
                    warn!(error = %e, "Failed to parse ROUTER_SERVICES, falling back to per-vendor variables");
                    vendor_fallback_backends(&lookup, request_timeout)
                }
            },
            _ => vendor_fallback_backends(&lookup, request_timeout),
        };

        if backends.is_empty() {
            return Err(ConfigError::NoBackends);
        }

        Ok(Self {
            host,
            port,
            request_timeout,
            enable_auth,
            backends,
        })
    }
}

/// Parse the `ROUTER_SERVICES` JSON list into backend descriptors.
pub fn parse_services_json(
    text: &str,
    default_timeout: Duration,
) -> Result<Vec<BackendConfig>, ConfigError> {
    let entries: Vec<ServiceEntry> =
        serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let mut backends = Vec::with_capacity(entries.len());
    for entry in entries {
        let mut backend = BackendConfig::new(entry.name, entry.backend_type, entry.base_url)
            .with_timeout(
                entry
                    .timeout
                    .map_or(default_timeout, Duration::from_secs),
            )
            .with_priority(entry.priority);
        if let Some(key) = entry.api_key {
            backend = backend.with_api_key(key);
        }
        if let Some(max_requests) = entry.rate_limit_requests {
            backend = backend
                .with_rate_limit(max_requests, Duration::from_secs(entry.rate_limit_window));
        }

        validate_backend(&backend)?;
        backends.push(backend);
    }

    Ok(backends)
}

/// Build backends from per-vendor environment variables.
///
/// Hosted vendors appear only when their credential is present, in the order
/// cerebras, deepinfra, openai; a local Ollama entry always closes the list.
fn vendor_fallback_backends(
    lookup: &impl Fn(&str) -> Option<String>,
    timeout: Duration,
) -> Vec<BackendConfig> {
    let mut backends = Vec::new();
    let mut priority = 0;

    if let Some(key) = lookup("CEREBRAS_API_KEY") {
        let max_requests = lookup("CEREBRAS_RATE_LIMIT_REQUESTS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);
        let window = lookup("CEREBRAS_RATE_LIMIT_WINDOW")
            .and_then(|v| v.parse().ok())
            .map_or(default_window(), Duration::from_secs);
        backends.push(
            BackendConfig::new(
                "cerebras",
                BackendType::Cerebras,
                lookup("CEREBRAS_BASE_URL")
                    .unwrap_or_else(|| "https://api.cerebras.ai/v1".to_string()),
            )
            .with_api_key(key)
            .with_timeout(timeout)
            .with_priority(priority)
            .with_rate_limit(max_requests, window),
        );
        priority += 1;
    }

    if let Some(token) = lookup("DEEPINFRA_TOKEN") {
        backends.push(
            BackendConfig::new(
                "deepinfra",
                BackendType::DeepInfra,
                lookup("DEEPINFRA_BASE_URL")
                    .unwrap_or_else(|| "https://api.deepinfra.com/v1/openai".to_string()),
            )
            .with_api_key(token)
            .with_timeout(timeout)
            .with_priority(priority),
        );
        priority += 1;
    }

    if let Some(key) = lookup("OPENAI_API_KEY") {
        backends.push(
            BackendConfig::new(
                "openai",
                BackendType::OpenAi,
                lookup("OPENAI_BASE_URL").unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            )
            .with_api_key(key)
            .with_timeout(timeout)
            .with_priority(priority),
        );
        priority += 1;
    }

    backends.push(
        BackendConfig::new(
            "ollama",
            BackendType::Ollama,
            lookup("OLLAMA_BASE_URL").unwrap_or_else(|| "http://localhost:11434/v1".to_string()),
        )
        .with_timeout(timeout)
        .with_priority(priority),
    );

    backends
}

fn validate_backend(backend: &BackendConfig) -> Result<(), ConfigError> {
    if backend.name.is_empty() {
        return Err(ConfigError::InvalidBackend {
            name: "<unnamed>".to_string(),
            message: "name must not be empty".to_string(),
        });
    }
    Url::parse(&backend.base_url).map_err(|e| ConfigError::InvalidBackend {
        name: backend.name.clone(),
        message: format!("invalid base_url '{}': {e}", backend.base_url),
    })?;
    if backend.backend_type.profile().requires_api_key && backend.api_key.is_none() {
        return Err(ConfigError::InvalidBackend {
            name: backend.name.clone(),
            message: format!("{} backend requires an API key", backend.backend_type),
        });
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct ServiceEntry {
    name: String,
    backend_type: BackendType,
    base_url: String,
    #[serde(default)]
    api_key: Option<String>,
    /// Timeout in seconds, mirroring the JSON wire format.
    #[serde(default)]
    timeout: Option<u64>,
    #[serde(default)]
    priority: i32,
    #[serde(default)]
    rate_limit_requests: Option<u32>,
    #[serde(default = "default_window_secs")]
    rate_limit_window: u64,
}

fn default_window_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize)]
struct FileConfig {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(with = "humantime_serde", default = "default_timeout")]
    request_timeout: Duration,
    #[serde(default = "default_true")]
    enable_auth: bool,
    #[serde(default)]
    backends: Vec<FileBackend>,
}

#[derive(Debug, Deserialize)]
struct FileBackend {
    name: String,
    backend_type: BackendType,
    base_url: String,
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    api_key_env: Option<String>,
    #[serde(with = "humantime_serde", default)]
    timeout: Option<Duration>,
    #[serde(default)]
    priority: i32,
    #[serde(default)]
    rate_limit: Option<RateLimitPolicy>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_services_json_round_trip() {
        let json = r#"[
            {"name": "cerebras", "backend_type": "cerebras", "base_url": "https://api.cerebras.ai/v1",
             "api_key": "csk-test", "priority": 0, "rate_limit_requests": 30, "rate_limit_window": 60},
            {"name": "local", "backend_type": "ollama", "base_url": "http://localhost:11434/v1",
             "priority": 1, "timeout": 120}
        ]"#;

        let backends = parse_services_json(json, Duration::from_secs(60)).unwrap();
        assert_eq!(backends.len(), 2);
        assert_eq!(backends[0].name, "cerebras");
        assert!(backends[0].has_rate_limit());
        assert_eq!(
            backends[0].rate_limit.unwrap().window,
            Duration::from_secs(60)
        );
        assert_eq!(backends[1].timeout, Duration::from_secs(120));
        assert!(!backends[1].has_rate_limit());
    }

    #[test]
    fn test_services_json_rejects_hosted_backend_without_key() {
        let json = r#"[{"name": "openai", "backend_type": "openai", "base_url": "https://api.openai.com/v1"}]"#;
        let err = parse_services_json(json, Duration::from_secs(60)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBackend { .. }));
    }

    #[test]
    fn test_services_json_rejects_bad_base_url() {
        let json = r#"[{"name": "x", "backend_type": "custom", "base_url": "not a url"}]"#;
        assert!(parse_services_json(json, Duration::from_secs(60)).is_err());
    }

    #[test]
    fn test_vendor_fallback_ordering() {
        let lookup = lookup_from(&[
            ("CEREBRAS_API_KEY", "csk-1"),
            ("DEEPINFRA_TOKEN", "di-1"),
            ("OPENAI_API_KEY", "sk-1"),
        ]);
        let settings = Settings::from_lookup(lookup).unwrap();

        let names: Vec<&str> = settings.backends.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["cerebras", "deepinfra", "openai", "ollama"]);
        let priorities: Vec<i32> = settings.backends.iter().map(|b| b.priority).collect();
        assert_eq!(priorities, vec![0, 1, 2, 3]);
        // The vendor fallback applies the documented cerebras default limit.
        assert!(settings.backends[0].has_rate_limit());
    }

    #[test]
    fn test_vendor_fallback_always_includes_ollama() {
        let settings = Settings::from_lookup(|_| None).unwrap();
        assert_eq!(settings.backends.len(), 1);
        assert_eq!(settings.backends[0].name, "ollama");
        assert_eq!(settings.backends[0].backend_type, BackendType::Ollama);
    }

    #[test]
    fn test_invalid_services_json_falls_back_to_vendor_vars() {
        let lookup = lookup_from(&[
            (SERVICES_VAR, "{not json"),
            ("OPENAI_API_KEY", "sk-1"),
        ]);
        let settings = Settings::from_lookup(lookup).unwrap();
        let names: Vec<&str> = settings.backends.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["openai", "ollama"]);
    }

    #[test]
    fn test_enable_auth_flag_parsing() {
        let settings = Settings::from_lookup(lookup_from(&[("ENABLE_AUTH", "false")])).unwrap();
        assert!(!settings.enable_auth);

        let settings = Settings::from_lookup(lookup_from(&[("ENABLE_AUTH", "1")])).unwrap();
        assert!(settings.enable_auth);
    }

    #[test]
    fn test_yaml_config_with_env_credential() {
        let yaml = r"
host: 127.0.0.1
port: 9000
request_timeout: 30s
backends:
  - name: primary
    backend_type: openai
    base_url: https://api.openai.com/v1
    api_key_env: MY_OPENAI_KEY
    rate_limit:
      max_requests: 10
      window: 60s
  - name: local
    backend_type: ollama
    base_url: http://localhost:11434/v1
    priority: 1
    timeout: 2m
";
        let settings =
            Settings::from_yaml(yaml, lookup_from(&[("MY_OPENAI_KEY", "sk-env")])).unwrap();
        assert_eq!(settings.host, "127.0.0.1");
        assert_eq!(settings.port, 9000);
        assert_eq!(settings.request_timeout, Duration::from_secs(30));
        assert_eq!(settings.backends.len(), 2);
        assert!(settings.backends[0].api_key.is_some());
        assert!(settings.backends[0].has_rate_limit());
        // Unset per-backend timeout inherits the file-level default.
        assert_eq!(settings.backends[0].timeout, Duration::from_secs(30));
        assert_eq!(settings.backends[1].timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_yaml_config_without_backends_is_rejected() {
        let err = Settings::from_yaml("host: 0.0.0.0\n", |_| None).unwrap_err();
        assert!(matches!(err, ConfigError::NoBackends));
    }
}
