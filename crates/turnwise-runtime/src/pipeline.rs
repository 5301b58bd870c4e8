//! Turn pipeline: one model call per user turn.
//!
//! ```text
//! prefix ─▶ extract state ─▶ build context ─▶ provider ─▶ post-hoc state ─▶ artifact
//! ```
//!
//! Only extraction, context, registry and persistence errors propagate.
//! A failing provider call becomes a record with `ok = false`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use turnwise_core::{
    ChatMessage, ContextAudit, ContextBuilder, ConversationMeta, GenerationParams,
    StateExtractor, StateSnapshot, Turn,
};

use crate::artifacts::ArtifactStore;
use crate::providers::{ChatRequest, ProviderRegistry, ProviderResponse};
use crate::RuntimeError;

/// Inputs for one turn.
#[derive(Debug, Clone, Copy)]
pub struct TurnRequest<'a> {
    pub run_id: &'a str,
    pub provider: &'a str,
    pub model: &'a str,
    pub domain: &'a str,
    pub conversation_id: &'a str,
    /// Transcript position of the user turn being answered
    pub turn_index: usize,
    /// Transcript up to and including that user turn
    pub turns: &'a [Turn],
    pub meta: &'a ConversationMeta,
    pub max_tokens: u32,
}

/// Outbound half of a turn record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedRequest {
    pub messages: Vec<ChatMessage>,
    pub params: GenerationParams,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Timestamps {
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

/// Immutable record of one model call, keyed by
/// (run id, conversation id, turn index).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub run_id: String,
    pub provider: String,
    pub model: String,
    pub conversation_id: String,
    pub turn_index: usize,
    /// Transcript position of the generated reply (`turn_index + 1`)
    pub reply_index: usize,
    /// State threaded into the context for this call
    pub pre_state: StateSnapshot,
    /// State extracted from the prefix plus the reply
    pub state: StateSnapshot,
    pub context_audit: ContextAudit,
    pub request: RecordedRequest,
    pub response: ProviderResponse,
    pub timestamps: Timestamps,
}

impl TurnRecord {
    /// Text of the outbound messages, used as hallucination history.
    pub fn history(&self) -> Vec<&str> {
        self.request
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect()
    }
}

pub struct TurnPipeline {
    extractor: Arc<dyn StateExtractor>,
    context_builder: Arc<dyn ContextBuilder>,
    providers: Arc<ProviderRegistry>,
    artifacts: Arc<dyn ArtifactStore>,
}

impl TurnPipeline {
    pub fn new(
        extractor: Arc<dyn StateExtractor>,
        context_builder: Arc<dyn ContextBuilder>,
        providers: Arc<ProviderRegistry>,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            extractor,
            context_builder,
            providers,
            artifacts,
        }
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    /// Run one turn and persist its record.
    pub async fn run_turn(&self, req: TurnRequest<'_>) -> Result<TurnRecord, RuntimeError> {
        let started_at = Utc::now();

        let pre_state = self.extractor.extract_state(req.domain, req.turns)?;
        let built = self.context_builder.build_context(
            req.domain,
            req.turns,
            &pre_state,
            req.max_tokens,
            req.meta,
        )?;
        let provider = self.providers.resolve(req.provider)?;

        let mut metadata = BTreeMap::new();
        metadata.insert("run_id".to_string(), req.run_id.into());
        metadata.insert("conversation_id".to_string(), req.conversation_id.into());
        metadata.insert("turn_index".to_string(), req.turn_index.into());

        let request = ChatRequest {
            model: req.model.to_string(),
            messages: built.messages,
            params: built.params,
            metadata,
        };

        let clock = Instant::now();
        let result = provider.complete(&request).await;
        let latency_ms = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX);

        if let Err(e) = &result {
            tracing::warn!(
                run_id = req.run_id,
                conversation_id = req.conversation_id,
                turn_index = req.turn_index,
                provider = req.provider,
                latency_ms,
                error = %e,
                "Provider call failed"
            );
        }
        let response = ProviderResponse::from_result(result, latency_ms);

        let state = if response.ok {
            let mut transcript = req.turns.to_vec();
            transcript.push(Turn::assistant(response.content.clone()));
            self.extractor.extract_state(req.domain, &transcript)?
        } else {
            pre_state.clone()
        };

        let record = TurnRecord {
            run_id: req.run_id.to_string(),
            provider: req.provider.to_string(),
            model: req.model.to_string(),
            conversation_id: req.conversation_id.to_string(),
            turn_index: req.turn_index,
            reply_index: req.turn_index + 1,
            pre_state,
            state,
            context_audit: built.audit,
            request: RecordedRequest {
                messages: request.messages,
                params: request.params,
            },
            response,
            timestamps: Timestamps {
                started_at,
                ended_at: Utc::now(),
            },
        };

        self.artifacts.write_turn(&record).await?;

        tracing::debug!(
            run_id = req.run_id,
            conversation_id = req.conversation_id,
            turn_index = req.turn_index,
            provider = req.provider,
            latency_ms,
            ok = record.response.ok,
            "Turn complete"
        );

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::{ArtifactError, MemoryArtifactStore};
    use crate::providers::{ChatProvider, Completion, ProviderError};
    use async_trait::async_trait;
    use turnwise_core::{
        Decision, ExtractionError, PromptContextBuilder, RegexStateExtractor,
    };

    struct EchoProvider;

    #[async_trait]
    impl ChatProvider for EchoProvider {
        async fn complete(&self, request: &ChatRequest) -> Result<Completion, ProviderError> {
            let last = request.messages.last().map(|m| m.content.as_str()).unwrap_or("");
            Ok(Completion {
                content: format!("Refund approved for order A1. You said: {}", last),
                provider_meta: serde_json::json!({"echo": true}),
            })
        }

        fn name(&self) -> &str {
            "echo"
        }
    }

    struct DownProvider;

    #[async_trait]
    impl ChatProvider for DownProvider {
        async fn complete(&self, _request: &ChatRequest) -> Result<Completion, ProviderError> {
            Err(ProviderError::ApiError {
                status: 503,
                message: "unavailable".to_string(),
            })
        }

        fn name(&self) -> &str {
            "down"
        }
    }

    struct BrokenExtractor;

    impl StateExtractor for BrokenExtractor {
        fn extract_state(
            &self,
            _domain: &str,
            _transcript: &[Turn],
        ) -> Result<StateSnapshot, ExtractionError> {
            Err(ExtractionError::Failed("state store offline".to_string()))
        }
    }

    fn pipeline_with(
        extractor: Arc<dyn StateExtractor>,
        store: Arc<MemoryArtifactStore>,
    ) -> TurnPipeline {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(EchoProvider));
        registry.register(Arc::new(DownProvider));
        TurnPipeline::new(
            extractor,
            Arc::new(PromptContextBuilder::new()),
            Arc::new(registry),
            store,
        )
    }

    fn request<'a>(provider: &'a str, turns: &'a [Turn], meta: &'a ConversationMeta) -> TurnRequest<'a> {
        TurnRequest {
            run_id: "run-1",
            provider,
            model: "m",
            domain: "commerce",
            conversation_id: "c1",
            turn_index: turns.len() - 1,
            turns,
            meta,
            max_tokens: 2048,
        }
    }

    #[tokio::test]
    async fn test_run_turn_persists_record() {
        let store = Arc::new(MemoryArtifactStore::new());
        let pipeline = pipeline_with(Arc::new(RegexStateExtractor::new()), store.clone());
        let turns = vec![Turn::user("I want a refund for order A1")];
        let meta = ConversationMeta::default();

        let record = pipeline.run_turn(request("echo", &turns, &meta)).await.unwrap();

        assert!(record.response.ok);
        assert_eq!(record.turn_index, 0);
        assert_eq!(record.reply_index, 1);
        assert!(record.pre_state.decision.is_none());
        assert_eq!(record.state.decision, Some(Decision::Allow));
        assert_eq!(record.request.messages[0].role, "system");
        assert!(record.timestamps.ended_at >= record.timestamps.started_at);

        let stored = store.read_turns("run-1", "c1").await.unwrap();
        assert_eq!(stored, vec![record]);
    }

    #[tokio::test]
    async fn test_provider_failure_is_recorded_not_raised() {
        let store = Arc::new(MemoryArtifactStore::new());
        let pipeline = pipeline_with(Arc::new(RegexStateExtractor::new()), store.clone());
        let turns = vec![Turn::user("hello")];
        let meta = ConversationMeta::default();

        let record = pipeline.run_turn(request("down", &turns, &meta)).await.unwrap();

        assert!(!record.response.ok);
        assert!(record.response.content.is_empty());
        assert!(record.response.error.as_deref().unwrap().contains("unavailable"));
        assert_eq!(record.response.provider_meta["status"], 503);
        assert_eq!(record.state, record.pre_state);
    }

    #[tokio::test]
    async fn test_unknown_provider_is_not_found() {
        let store = Arc::new(MemoryArtifactStore::new());
        let pipeline = pipeline_with(Arc::new(RegexStateExtractor::new()), store.clone());
        let turns = vec![Turn::user("hello")];
        let meta = ConversationMeta::default();

        let err = pipeline.run_turn(request("nope", &turns, &meta)).await.unwrap_err();
        assert!(matches!(err, RuntimeError::NotFound { kind: "provider", .. }));
        assert!(store.read_turns("run-1", "c1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_extraction_error_propagates() {
        let store = Arc::new(MemoryArtifactStore::new());
        let pipeline = pipeline_with(Arc::new(BrokenExtractor), store);
        let turns = vec![Turn::user("hello")];
        let meta = ConversationMeta::default();

        let err = pipeline.run_turn(request("echo", &turns, &meta)).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "State extraction failed: Extraction failed: state store offline"
        );
    }

    #[tokio::test]
    async fn test_same_turn_twice_is_already_exists() {
        let store = Arc::new(MemoryArtifactStore::new());
        let pipeline = pipeline_with(Arc::new(RegexStateExtractor::new()), store);
        let turns = vec![Turn::user("hello")];
        let meta = ConversationMeta::default();

        pipeline.run_turn(request("echo", &turns, &meta)).await.unwrap();
        let err = pipeline.run_turn(request("echo", &turns, &meta)).await.unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Artifact(ArtifactError::AlreadyExists(_))
        ));
    }
}
