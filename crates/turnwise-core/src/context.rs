//! Context building: transcript + state + scenario metadata → model input.
//!
//! The extracted state is rendered into the system prompt, which is how
//! facts established in earlier turns reach later model calls.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::prompts;
use crate::types::{ChatMessage, ConversationMeta, Role, StateSnapshot, Turn};

/// Errors that can occur while building a context.
#[derive(Error, Debug)]
pub enum ContextError {
    #[error("Transcript is empty")]
    EmptyTranscript,

    #[error("Transcript must end with a user turn, found {0:?}")]
    LastTurnNotUser(Role),

    #[error("Invalid generation parameter '{key}': {reason}")]
    InvalidParam { key: String, reason: String },
}

/// Sampling parameters forwarded to the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 512,
            top_p: 1.0,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
            seed: None,
        }
    }
}

impl GenerationParams {
    /// Apply per-conversation overrides. Unknown keys are ignored.
    pub fn apply_overrides(
        &mut self,
        overrides: &BTreeMap<String, JsonValue>,
    ) -> Result<(), ContextError> {
        for (key, value) in overrides {
            let number = || {
                value.as_f64().ok_or_else(|| ContextError::InvalidParam {
                    key: key.clone(),
                    reason: format!("expected a number, got {}", value),
                })
            };
            match key.as_str() {
                "temperature" => self.temperature = number()? as f32,
                "top_p" => self.top_p = number()? as f32,
                "presence_penalty" => self.presence_penalty = number()? as f32,
                "frequency_penalty" => self.frequency_penalty = number()? as f32,
                "max_tokens" => self.max_tokens = number()? as u32,
                "seed" => self.seed = value.as_u64(),
                _ => {}
            }
        }
        Ok(())
    }
}

/// What the builder did to fit the budget.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextAudit {
    pub max_tokens: u32,
    pub estimated_tokens: u32,
    pub transcript_turns: usize,
    pub dropped_messages: usize,
    pub system_chars: usize,
    pub system_truncated: bool,
    pub state_included: bool,
}

/// Provider-ready input for one turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuiltContext {
    pub messages: Vec<ChatMessage>,
    pub params: GenerationParams,
    pub audit: ContextAudit,
}

/// Builds the message list for one model call.
pub trait ContextBuilder: Send + Sync {
    fn build_context(
        &self,
        domain: &str,
        transcript: &[Turn],
        state: &StateSnapshot,
        max_tokens: u32,
        meta: &ConversationMeta,
    ) -> Result<BuiltContext, ContextError>;
}

/// Rough token estimate: ~4 characters per token.
pub fn estimate_tokens(text: &str) -> u32 {
    text.len().div_ceil(4) as u32
}

/// Default builder: one system message, then the transcript, oldest
/// messages dropped first when over budget.
#[derive(Debug, Clone)]
pub struct PromptContextBuilder {
    system_max_chars: usize,
}

impl Default for PromptContextBuilder {
    fn default() -> Self {
        Self {
            system_max_chars: prompts::SYSTEM_PROMPT_MAX_CHARS,
        }
    }
}

impl PromptContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_system_max_chars(mut self, max: usize) -> Self {
        self.system_max_chars = max;
        self
    }

    fn system_prompt(&self, domain: &str, state: &StateSnapshot, meta: &ConversationMeta) -> String {
        let axes: Vec<(String, String)> = meta
            .axes
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let policy = meta
            .policy_text
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(prompts::NO_POLICY_TEXT);
        let facts = meta
            .facts_text
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(prompts::NO_FACTS_TEXT);

        let mut content = format!(
            "{}\n\nRole:\n{}\n\nSafety/Policy:\n{}\n\nScenario Facts:\n{}\n\n",
            prompts::header(domain, meta.behavior.as_deref(), &axes),
            prompts::ROLE_PROMPT,
            policy,
            facts,
        );

        if !state.is_empty() {
            // Serializing a snapshot of plain fields cannot fail.
            let state_json = serde_json::to_string(state).unwrap_or_default();
            content.push_str(&format!("Known State:\n{}\n\n", state_json));
        }

        content.push_str(prompts::OUTPUT_REQUIREMENTS);
        content
    }
}

impl ContextBuilder for PromptContextBuilder {
    fn build_context(
        &self,
        domain: &str,
        transcript: &[Turn],
        state: &StateSnapshot,
        max_tokens: u32,
        meta: &ConversationMeta,
    ) -> Result<BuiltContext, ContextError> {
        let last = transcript.last().ok_or(ContextError::EmptyTranscript)?;
        if last.role != Role::User {
            return Err(ContextError::LastTurnNotUser(last.role));
        }

        let mut params = GenerationParams::default();
        params.apply_overrides(&meta.params)?;

        let mut system = self.system_prompt(domain, state, meta);
        let mut system_truncated = false;
        if system.chars().count() > self.system_max_chars {
            system = truncate_chars(&system, self.system_max_chars);
            system_truncated = true;
        }

        let mut history: Vec<ChatMessage> = transcript.iter().map(ChatMessage::from).collect();
        let mut dropped = 0;
        let total = |system: &str, history: &[ChatMessage]| -> u32 {
            estimate_tokens(system) + history.iter().map(|m| estimate_tokens(&m.content)).sum::<u32>()
        };

        // The current user turn is never dropped.
        while total(&system, &history) > max_tokens && history.len() > 1 {
            history.remove(0);
            dropped += 1;
        }

        let history_tokens: u32 = history.iter().map(|m| estimate_tokens(&m.content)).sum();
        if estimate_tokens(&system) + history_tokens > max_tokens {
            let room = max_tokens.saturating_sub(history_tokens) as usize * 4;
            system = truncate_chars(&system, room.max(1));
            system_truncated = true;
        }

        let audit = ContextAudit {
            max_tokens,
            estimated_tokens: total(&system, &history),
            transcript_turns: transcript.len(),
            dropped_messages: dropped,
            system_chars: system.chars().count(),
            system_truncated,
            state_included: !state.is_empty(),
        };

        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(ChatMessage::system(system));
        messages.extend(history);

        Ok(BuiltContext {
            messages,
            params,
            audit,
        })
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(1);
    let mut out: String = text.chars().take(keep).collect();
    out.push('…');
    out
}
