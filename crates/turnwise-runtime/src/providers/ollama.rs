//! Ollama chat provider (`/api/chat`, non-streaming).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::http::{endpoint, HttpTransport};
use super::{ChatProvider, ChatRequest, Completion, ProviderError};
use crate::config::ProviderConfig;
use turnwise_core::ChatMessage;

#[derive(Debug, Clone)]
pub struct OllamaProvider {
    host: String,
    transport: HttpTransport,
}

impl OllamaProvider {
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            host: config.ollama_host.trim_end_matches('/').to_string(),
            transport: HttpTransport::new(config.request_timeout, config.max_retries)?,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    top_p: f32,
    num_predict: u32,
    presence_penalty: f32,
    frequency_penalty: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaMessage,
    #[serde(default)]
    total_duration: Option<u64>,
    #[serde(default)]
    load_duration: Option<u64>,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
}

#[async_trait]
impl ChatProvider for OllamaProvider {
    async fn complete(&self, request: &ChatRequest) -> Result<Completion, ProviderError> {
        let params = &request.params;
        let body = OllamaChatRequest {
            model: &request.model,
            messages: &request.messages,
            stream: false,
            options: OllamaOptions {
                temperature: params.temperature,
                top_p: params.top_p,
                num_predict: params.max_tokens,
                presence_penalty: params.presence_penalty,
                frequency_penalty: params.frequency_penalty,
                seed: params.seed,
            },
        };
        let url = endpoint(&self.host, "api/chat");

        let response: OllamaChatResponse = self
            .transport
            .send_json(|client| client.post(&url).json(&body))
            .await?;

        Ok(Completion {
            content: response.message.content,
            provider_meta: json!({
                "total_duration": response.total_duration,
                "load_duration": response.load_duration,
                "prompt_eval_count": response.prompt_eval_count,
                "eval_count": response.eval_count,
            }),
        })
    }

    fn name(&self) -> &str {
        "ollama"
    }
}
