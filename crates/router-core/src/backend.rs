//! Backend types, per-type profiles, and the adapter trait.
//!
//! Backend-specific quirks live in one place: each [`BackendType`] carries a
//! static [`BackendProfile`] describing which request fields the backend
//! cannot digest and which models to advertise when its listing endpoint is
//! unreachable.

use crate::error::RouterError;
use crate::request::ChatCompletionRequest;
use crate::response::{ChatCompletionResponse, ModelList};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A stream of ready-to-forward SSE frames (`data: <json>\n\n` and friends).
pub type FrameStream = BoxStream<'static, Result<Bytes, RouterError>>;

/// The kind of upstream a backend descriptor points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// api.openai.com or a drop-in replacement.
    OpenAi,
    /// Cerebras inference cloud.
    Cerebras,
    /// DeepInfra's OpenAI-compatible endpoint.
    DeepInfra,
    /// A local Ollama server.
    Ollama,
    /// Any other OpenAI-compatible endpoint.
    Custom,
}

impl BackendType {
    /// Canonical lowercase name used on the wire and in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Cerebras => "cerebras",
            Self::DeepInfra => "deepinfra",
            Self::Ollama => "ollama",
            Self::Custom => "custom",
        }
    }

    /// The static profile for this backend type.
    #[must_use]
    pub fn profile(self) -> &'static BackendProfile {
        match self {
            Self::OpenAi => &OPENAI_PROFILE,
            Self::Cerebras => &CEREBRAS_PROFILE,
            Self::DeepInfra => &DEEPINFRA_PROFILE,
            Self::Ollama => &OLLAMA_PROFILE,
            Self::Custom => &CUSTOM_PROFILE,
        }
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An entry in a backend type's static fallback catalog.
#[derive(Debug, Clone, Copy)]
pub struct CatalogModel {
    /// Model identifier.
    pub id: &'static str,
    /// Owning organization reported in the listing.
    pub owned_by: &'static str,
}

/// Static, per-type configuration table.
#[derive(Debug)]
pub struct BackendProfile {
    /// Whether this type refuses to operate without a credential.
    pub requires_api_key: bool,
    /// Request fields the backend chokes on; stripped before dispatch.
    pub strip_fields: &'static [&'static str],
    /// Models advertised when the listing endpoint is unavailable.
    pub fallback_models: &'static [CatalogModel],
}

static OPENAI_PROFILE: BackendProfile = BackendProfile {
    requires_api_key: true,
    strip_fields: &[],
    fallback_models: &[
        CatalogModel { id: "gpt-4", owned_by: "openai" },
        CatalogModel { id: "gpt-4-turbo", owned_by: "openai" },
        CatalogModel { id: "gpt-3.5-turbo", owned_by: "openai" },
    ],
};

static CEREBRAS_PROFILE: BackendProfile = BackendProfile {
    requires_api_key: true,
    strip_fields: &[],
    fallback_models: &[
        CatalogModel { id: "llama3.1-8b", owned_by: "cerebras" },
        CatalogModel { id: "llama3.1-70b", owned_by: "cerebras" },
    ],
};

static DEEPINFRA_PROFILE: BackendProfile = BackendProfile {
    requires_api_key: true,
    strip_fields: &[],
    fallback_models: &[
        CatalogModel { id: "Qwen/Qwen3-Coder-480B-A35B-Instruct-Turbo", owned_by: "deepinfra" },
        CatalogModel { id: "Qwen/Qwen3-Coder-480B-A35B-Instruct", owned_by: "deepinfra" },
        CatalogModel { id: "Qwen/Qwen3-30B-A3B", owned_by: "deepinfra" },
        CatalogModel { id: "Qwen/Qwen3-235B-A22B-Thinking-2507", owned_by: "deepinfra" },
    ],
};

// Local servers reject parameters they have never heard of.
static OLLAMA_PROFILE: BackendProfile = BackendProfile {
    requires_api_key: false,
    strip_fields: &["logit_bias", "user"],
    fallback_models: &[
        CatalogModel { id: "llama-2-7b-chat", owned_by: "local" },
        CatalogModel { id: "llama-2-13b-chat", owned_by: "local" },
        CatalogModel { id: "mistral-7b-instruct", owned_by: "local" },
    ],
};

static CUSTOM_PROFILE: BackendProfile = BackendProfile {
    requires_api_key: false,
    strip_fields: &[],
    fallback_models: &[CatalogModel { id: "default", owned_by: "custom" }],
};

/// One upstream adapter, normalizing chat completions and model listings
/// to and from that backend's wire format.
///
/// The selection engine only speaks this trait, which keeps it testable with
/// programmable in-memory backends.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Type of the upstream this adapter talks to.
    fn backend_type(&self) -> BackendType;

    /// Base URL of the upstream, for health reporting.
    fn base_url(&self) -> &str;

    /// Whether a credential is configured, for health reporting.
    fn has_api_key(&self) -> bool;

    /// Execute a non-streaming chat completion.
    async fn chat_completion(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, RouterError>;

    /// Execute a streaming chat completion, returning canonical SSE frames.
    async fn chat_completion_stream(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<FrameStream, RouterError>;

    /// List the models this backend supports.
    ///
    /// Never fails: on any transport or API error the adapter answers with
    /// the static fallback catalog for its type.
    async fn list_models(&self) -> ModelList;
}
