//! OpenAI-compatible response types and routing metadata.

use crate::backend::BackendType;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The assistant message inside a completion choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMessage {
    /// Role of the author, normally `assistant`.
    pub role: String,
    /// Generated content.
    pub content: String,
}

/// One completion choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    /// Position of this choice in the response.
    pub index: u32,
    /// The generated message.
    pub message: ResponseMessage,
    /// Why generation stopped, when the backend reported it.
    pub finish_reason: Option<String>,
}

/// Token usage accounting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens in the prompt.
    #[serde(default)]
    pub prompt_tokens: u32,
    /// Tokens in the completion.
    #[serde(default)]
    pub completion_tokens: u32,
    /// Total tokens used.
    #[serde(default)]
    pub total_tokens: u32,
}

/// Provenance attached to every routed response.
///
/// Serialized as the non-standard `router` field so OpenAI clients that ignore
/// unknown fields keep working unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingMetadata {
    /// Name of the backend that served the request.
    pub service: String,
    /// 1-based attempt number at which the request succeeded.
    pub attempt: usize,
    /// Wall-clock duration of the upstream call in seconds.
    pub duration: f64,
    /// Type of the serving backend.
    pub backend_type: BackendType,
    /// The model string as originally requested (may be a fallback chain).
    pub requested_model: String,
    /// The concrete model actually used.
    pub actual_model: String,
    /// The parsed fallback chain, in request order.
    pub model_options: Vec<String>,
}

/// Response body for `POST /v1/chat/completions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    /// Unique completion identifier.
    pub id: String,
    /// Always `chat.completion`.
    pub object: String,
    /// Unix timestamp of creation.
    pub created: i64,
    /// Model that produced the completion.
    pub model: String,
    /// Generated choices.
    pub choices: Vec<Choice>,
    /// Token usage.
    pub usage: Usage,
    /// Router provenance, absent on raw upstream responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub router: Option<RoutingMetadata>,
}

/// A model listing in the OpenAI wire shape.
///
/// Entries are kept as opaque JSON objects so that tagging them with router
/// provenance never disturbs the OpenAI-standard fields (`id`, `object`,
/// `created`, `owned_by`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelList {
    /// Always `list`.
    pub object: String,
    /// The model entries.
    pub data: Vec<Value>,
    /// Router provenance for merged listings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub router: Option<Value>,
}

impl ModelList {
    /// Create a listing from raw model entries.
    #[must_use]
    pub fn new(data: Vec<Value>) -> Self {
        Self {
            object: "list".to_string(),
            data,
            router: None,
        }
    }

    /// Model ids present in this listing, skipping entries without an `id`.
    #[must_use]
    pub fn model_ids(&self) -> Vec<String> {
        self.data
            .iter()
            .filter_map(|entry| entry.get("id").and_then(Value::as_str))
            .filter(|id| !id.is_empty())
            .map(ToString::to_string)
            .collect()
    }
}
