//! Chat provider abstractions.
//!
//! This module defines the trait every model backend implements and the
//! response record the turn pipeline persists. Adapters for Ollama,
//! OpenAI and Gemini sit behind cargo features.
//!
//! ## Security
//!
//! Adapters that need API keys hold them in [`ApiCredential`]; see the
//! [`secrets`] module.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use turnwise_core::{ChatMessage, GenerationParams};

mod registry;
pub mod secrets;

#[cfg(any(feature = "ollama", feature = "openai", feature = "gemini"))]
pub(crate) mod http;

#[cfg(feature = "gemini")]
mod gemini;
#[cfg(feature = "ollama")]
mod ollama;
#[cfg(feature = "openai")]
mod openai;

pub use registry::ProviderRegistry;
pub use secrets::{ApiCredential, CredentialSource};

#[cfg(feature = "gemini")]
pub use gemini::{GeminiProvider, GOOGLE_API_KEY_ENV};
#[cfg(feature = "ollama")]
pub use ollama::OllamaProvider;
#[cfg(feature = "openai")]
pub use openai::{OpenAiProvider, OPENAI_API_KEY_ENV};

/// Errors from chat providers.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    ParseError(String),

    #[error("Authentication failed")]
    AuthError,

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Transport failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::HttpError(_)
            | ProviderError::RateLimited { .. }
            | ProviderError::Timeout(_) => true,
            ProviderError::ApiError { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Provider metadata worth keeping on a failed turn record.
    fn meta(&self) -> JsonValue {
        match self {
            ProviderError::ApiError { status, .. } => serde_json::json!({ "status": status }),
            ProviderError::RateLimited { .. } => serde_json::json!({ "status": 429 }),
            _ => serde_json::json!({}),
        }
    }
}

/// One chat completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,

    pub messages: Vec<ChatMessage>,

    pub params: GenerationParams,

    /// Run/conversation/turn identifiers, for adapters that log or tag requests
    #[serde(default)]
    pub metadata: BTreeMap<String, JsonValue>,
}

/// Successful completion.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub content: String,

    /// Provider-specific details (usage, durations, model revision)
    pub provider_meta: JsonValue,
}

/// Provider outcome as persisted on a turn record.
///
/// Failures are data: `ok = false` with the error message, never an `Err`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub ok: bool,
    pub content: String,
    pub latency_ms: u64,
    #[serde(default)]
    pub provider_meta: JsonValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProviderResponse {
    pub fn from_result(result: Result<Completion, ProviderError>, latency_ms: u64) -> Self {
        match result {
            Ok(completion) => Self {
                ok: true,
                content: completion.content,
                latency_ms,
                provider_meta: completion.provider_meta,
                error: None,
            },
            Err(err) => Self {
                ok: false,
                content: String::new(),
                latency_ms,
                provider_meta: err.meta(),
                error: Some(err.to_string()),
            },
        }
    }
}

/// A model backend.
///
/// This is the only place model calls are made; the pipeline absorbs any
/// error into a failed [`ProviderResponse`].
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Execute a chat completion.
    async fn complete(&self, request: &ChatRequest) -> Result<Completion, ProviderError>;

    /// Registry name ("ollama", "openai", ...).
    fn name(&self) -> &str;

    /// Check if provider is usable.
    async fn health_check(&self) -> bool {
        true
    }
}
