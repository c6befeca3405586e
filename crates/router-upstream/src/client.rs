//! OpenAI-compatible upstream client.
//!
//! One client per configured backend. The wire format is the OpenAI chat API;
//! per-type quirks (payload stripping, fallback catalogs, credential
//! requirements) come from the backend type's static profile.

use crate::transcode;
use async_trait::async_trait;
use chrono::Utc;
use futures_util::{StreamExt, TryStreamExt};
use reqwest::{header, Client, StatusCode};
use router_core::{
    BackendType, ChatBackend, ChatCompletionRequest, ChatCompletionResponse, Choice, FrameStream,
    ModelList, ResponseMessage, RouterError, Usage,
};
use router_config::BackendConfig;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Client for one OpenAI-compatible upstream backend.
pub struct UpstreamClient {
    name: String,
    backend_type: BackendType,
    base_url: String,
    api_key: Option<SecretString>,
    timeout: Duration,
    client: Client,
}

impl UpstreamClient {
    /// Build a client from a backend descriptor.
    ///
    /// # Errors
    /// Returns an error if the backend type requires a credential and none is
    /// configured, or if the HTTP client cannot be constructed.
    pub fn new(config: &BackendConfig) -> Result<Self, RouterError> {
        let profile = config.backend_type.profile();
        if profile.requires_api_key && config.api_key.is_none() {
            return Err(RouterError::Configuration(format!(
                "{} backend requires an API key",
                config.backend_type
            )));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(format!("LLM-Router/1.0.0 ({})", config.backend_type))
            .build()
            .map_err(|e| RouterError::Internal(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            name: config.name.clone(),
            backend_type: config.backend_type,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            timeout: config.timeout,
            client,
        })
    }

    /// Name of the backend this client serves.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configured per-request deadline.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn endpoint_url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    /// Serialize the request, dropping fields the backend type cannot digest.
    fn build_payload(&self, request: &ChatCompletionRequest) -> Result<Value, RouterError> {
        let mut payload = serde_json::to_value(request)
            .map_err(|e| RouterError::Internal(format!("failed to serialize request: {e}")))?;
        if let Some(object) = payload.as_object_mut() {
            for field in self.backend_type.profile().strip_fields {
                object.remove(*field);
            }
        }
        Ok(payload)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header(
                header::AUTHORIZATION,
                format!("Bearer {}", key.expose_secret()),
            ),
            None => builder,
        }
    }

    fn map_transport_error(&self, error: &reqwest::Error) -> RouterError {
        if error.is_timeout() {
            RouterError::UpstreamTimeout {
                backend: self.name.clone(),
            }
        } else {
            RouterError::UpstreamConnection {
                backend: self.name.clone(),
                message: error.to_string(),
            }
        }
    }

    async fn api_error(&self, status: StatusCode, response: reqwest::Response) -> RouterError {
        let body = response.text().await.unwrap_or_default();
        RouterError::UpstreamApi {
            backend: self.name.clone(),
            status: status.as_u16(),
            message: extract_error_message(status.as_u16(), &body),
        }
    }

    /// Map an upstream JSON body into the canonical response shape.
    fn transform_response(&self, api_response: &Value, model: &str) -> ChatCompletionResponse {
        let choices = api_response
            .get("choices")
            .and_then(Value::as_array)
            .map(|choices| {
                choices
                    .iter()
                    .enumerate()
                    .map(|(index, choice)| transform_choice(choice, index as u32))
                    .collect()
            })
            .unwrap_or_default();

        let usage = api_response
            .get("usage")
            .and_then(|usage| serde_json::from_value::<Usage>(usage.clone()).ok())
            .unwrap_or_default();

        ChatCompletionResponse {
            id: api_response
                .get("id")
                .and_then(Value::as_str)
                .map_or_else(
                    || format!("chatcmpl-{}", Uuid::new_v4().simple()),
                    ToString::to_string,
                ),
            object: "chat.completion".to_string(),
            created: api_response
                .get("created")
                .and_then(Value::as_i64)
                .unwrap_or_else(|| Utc::now().timestamp()),
            model: model.to_string(),
            choices,
            usage,
            router: None,
        }
    }

    fn fallback_models(&self) -> ModelList {
        let created = Utc::now().timestamp();
        let data = self
            .backend_type
            .profile()
            .fallback_models
            .iter()
            .map(|model| {
                json!({
                    "id": model.id,
                    "object": "model",
                    "created": created,
                    "owned_by": model.owned_by,
                })
            })
            .collect();
        ModelList::new(data)
    }
}

#[async_trait]
impl ChatBackend for UpstreamClient {
    fn backend_type(&self) -> BackendType {
        self.backend_type
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    async fn chat_completion(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, RouterError> {
        let url = self.endpoint_url("chat/completions");
        let payload = self.build_payload(request)?;

        debug!(backend = %self.name, url = %url, model = %request.model, "Dispatching chat completion");

        let response = self
            .authorize(self.client.post(&url))
            .json(&payload)
            .send()
            .await
            .map_err(|e| self.map_transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.api_error(status, response).await);
        }

        let api_response: Value = response
            .json()
            .await
            .map_err(|e| self.map_transport_error(&e))?;

        Ok(self.transform_response(&api_response, &request.model))
    }

    async fn chat_completion_stream(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<FrameStream, RouterError> {
        let url = self.endpoint_url("chat/completions");
        let mut payload = self.build_payload(request)?;
        if let Some(object) = payload.as_object_mut() {
            object.insert("stream".to_string(), Value::Bool(true));
        }

        debug!(backend = %self.name, model = %request.model, "Dispatching streaming chat completion");

        let response = self
            .authorize(self.client.post(&url))
            .json(&payload)
            .send()
            .await
            .map_err(|e| self.map_transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.api_error(status, response).await);
        }

        let backend = self.name.clone();
        let upstream = response
            .bytes_stream()
            .map_err(move |e| {
                if e.is_timeout() {
                    RouterError::UpstreamTimeout {
                        backend: backend.clone(),
                    }
                } else {
                    RouterError::UpstreamConnection {
                        backend: backend.clone(),
                        message: e.to_string(),
                    }
                }
            })
            .boxed();

        Ok(transcode::transcode(upstream, request.model.clone()))
    }

    async fn list_models(&self) -> ModelList {
        let url = self.endpoint_url("models");

        let result = self.authorize(self.client.get(&url)).send().await;
        match result {
            Ok(response) if response.status().is_success() => {
                match response.json::<ModelList>().await {
                    Ok(models) => models,
                    Err(e) => {
                        warn!(backend = %self.name, error = %e, "Malformed model listing, using fallback catalog");
                        self.fallback_models()
                    }
                }
            }
            Ok(response) => {
                warn!(
                    backend = %self.name,
                    status = response.status().as_u16(),
                    "Model listing rejected, using fallback catalog"
                );
                self.fallback_models()
            }
            Err(e) => {
                warn!(backend = %self.name, error = %e, "Model listing unreachable, using fallback catalog");
                self.fallback_models()
            }
        }
    }
}

fn transform_choice(choice: &Value, index: u32) -> Choice {
    // Some APIs return a bare `text` instead of a chat message.
    let (role, content) = match choice.get("message") {
        Some(message) if message.is_object() => (
            message
                .get("role")
                .and_then(Value::as_str)
                .unwrap_or("assistant")
                .to_string(),
            message
                .get("content")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        ),
        _ => (
            "assistant".to_string(),
            choice
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        ),
    };

    let finish_reason = choice
        .get("finish_reason")
        .and_then(Value::as_str)
        .or_else(|| choice.get("stop_reason").and_then(Value::as_str))
        .map(ToString::to_string);

    Choice {
        index: choice
            .get("index")
            .and_then(Value::as_u64)
            .map_or(index, |i| i as u32),
        message: ResponseMessage { role, content },
        finish_reason,
    }
}

/// Best-effort error message extraction: `error.message`, then `message`,
/// then the raw body.
fn extract_error_message(status: u16, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        if let Some(message) = value
            .pointer("/error/message")
            .and_then(Value::as_str)
            .filter(|message| !message.is_empty())
        {
            return message.to_string();
        }
        if let Some(message) = value
            .get("message")
            .and_then(Value::as_str)
            .filter(|message| !message.is_empty())
        {
            return message.to_string();
        }
        return "Unknown error".to_string();
    }
    format!("HTTP {status}: {body}")
}
