//! OpenAI chat completions provider.
//!
//! ## Security
//!
//! The API key is read from `OPENAI_API_KEY` into an [`ApiCredential`] and
//! only exposed when the `Authorization` header is set. Without a key the
//! provider still registers; every call fails with `NotConfigured`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

use super::http::{endpoint, HttpTransport};
use super::secrets::ApiCredential;
use super::{ChatProvider, ChatRequest, Completion, ProviderError};
use crate::config::ProviderConfig;
use turnwise_core::ChatMessage;

/// Environment variable name for the OpenAI API key.
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

pub struct OpenAiProvider {
    credential: Option<ApiCredential>,
    base_url: String,
    transport: HttpTransport,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("credential", &self.credential)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl OpenAiProvider {
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            credential: ApiCredential::from_env_optional(OPENAI_API_KEY_ENV, "OpenAI API key"),
            base_url: config.openai_base_url.trim_end_matches('/').to_string(),
            transport: HttpTransport::new(config.request_timeout, config.max_retries)?,
        })
    }

    pub fn with_credential(mut self, credential: ApiCredential) -> Self {
        self.credential = Some(credential);
        self
    }
}

#[derive(Debug, Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    top_p: f32,
    max_completion_tokens: u32,
    presence_penalty: f32,
    frequency_penalty: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<JsonValue>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    async fn complete(&self, request: &ChatRequest) -> Result<Completion, ProviderError> {
        let credential = self.credential.as_ref().ok_or_else(|| {
            ProviderError::NotConfigured(format!("OpenAI disabled: missing {}", OPENAI_API_KEY_ENV))
        })?;

        let params = &request.params;
        let body = OpenAiRequest {
            model: &request.model,
            messages: &request.messages,
            temperature: params.temperature,
            top_p: params.top_p,
            max_completion_tokens: params.max_tokens,
            presence_penalty: params.presence_penalty,
            frequency_penalty: params.frequency_penalty,
            seed: params.seed,
        };
        let url = endpoint(&self.base_url, "chat/completions");

        let response: OpenAiResponse = self
            .transport
            .send_json(|client| {
                client
                    .post(&url)
                    .bearer_auth(credential.expose())
                    .json(&body)
            })
            .await?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ProviderError::ParseError("response has no choices".to_string()))?;

        Ok(Completion {
            content,
            provider_meta: json!({
                "model": response.model,
                "usage": response.usage,
            }),
        })
    }

    async fn health_check(&self) -> bool {
        self.credential.as_ref().is_some_and(|c| !c.is_empty())
    }

    fn name(&self) -> &str {
        "openai"
    }
}
