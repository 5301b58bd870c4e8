//! Google Gemini provider (`models/{model}:generateContent`).
//!
//! The first system message becomes `systemInstruction`; assistant turns
//! are sent with the `model` role. The key goes in the
//! `x-goog-api-key` header so it never appears in a logged URL.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::http::{endpoint, HttpTransport};
use super::secrets::ApiCredential;
use super::{ChatProvider, ChatRequest, Completion, ProviderError};
use crate::config::ProviderConfig;
use turnwise_core::{ChatMessage, GenerationParams};

/// Environment variable name for the Gemini API key.
pub const GOOGLE_API_KEY_ENV: &str = "GOOGLE_API_KEY";

pub struct GeminiProvider {
    credential: Option<ApiCredential>,
    base_url: String,
    transport: HttpTransport,
}

impl std::fmt::Debug for GeminiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiProvider")
            .field("credential", &self.credential)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl GeminiProvider {
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            credential: ApiCredential::from_env_optional(GOOGLE_API_KEY_ENV, "Gemini API key"),
            base_url: config.gemini_base_url.trim_end_matches('/').to_string(),
            transport: HttpTransport::new(config.request_timeout, config.max_retries)?,
        })
    }

    pub fn with_credential(mut self, credential: ApiCredential) -> Self {
        self.credential = Some(credential);
        self
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

fn text_content(role: &str, text: &str) -> GeminiContent {
    GeminiContent {
        role: role.to_string(),
        parts: vec![GeminiPart {
            text: text.to_string(),
        }],
    }
}

fn build_request(messages: &[ChatMessage], params: &GenerationParams) -> GeminiRequest {
    let mut system_instruction = None;
    let mut contents = Vec::with_capacity(messages.len());

    for message in messages {
        match message.role.as_str() {
            "system" if system_instruction.is_none() => {
                system_instruction = Some(text_content("system", &message.content));
            }
            "system" => {}
            "assistant" => contents.push(text_content("model", &message.content)),
            _ => contents.push(text_content("user", &message.content)),
        }
    }

    GeminiRequest {
        contents,
        system_instruction,
        generation_config: GenerationConfig {
            temperature: params.temperature,
            top_p: params.top_p,
            max_output_tokens: params.max_tokens,
            seed: params.seed,
        },
    }
}

#[async_trait]
impl ChatProvider for GeminiProvider {
    async fn complete(&self, request: &ChatRequest) -> Result<Completion, ProviderError> {
        let credential = self.credential.as_ref().ok_or_else(|| {
            ProviderError::NotConfigured(format!("Gemini disabled: missing {}", GOOGLE_API_KEY_ENV))
        })?;

        let body = build_request(&request.messages, &request.params);
        let url = endpoint(
            &self.base_url,
            &format!("models/{}:generateContent", request.model),
        );

        let response: GeminiResponse = self
            .transport
            .send_json(|client| {
                client
                    .post(&url)
                    .header("x-goog-api-key", credential.expose())
                    .json(&body)
            })
            .await?;

        let candidates = response.candidates.len();
        let content = response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|part| part.text)
            .ok_or_else(|| ProviderError::ParseError("response has no candidates".to_string()))?;

        Ok(Completion {
            content,
            provider_meta: json!({ "candidates": candidates }),
        })
    }

    async fn health_check(&self) -> bool {
        self.credential.as_ref().is_some_and(|c| !c.is_empty())
    }

    fn name(&self) -> &str {
        "gemini"
    }
}
