//! Offline scoring of persisted runs.
//!
//! The scorer never calls a chat model: it reads turn records back from
//! the artifact store, runs the requested metrics against golden data and
//! aggregates each conversation. Only the semantic metric does I/O, via
//! the [`Embedder`].

use std::sync::Arc;

use futures::future::join_all;

use turnwise_core::metrics::{
    adherence, consistency, exact_match, hallucination, DEFAULT_SEMANTIC_THRESHOLD,
};
use turnwise_core::{
    aggregate, EvalConfig, GoldenEntry, GoldenSet, MetricKind, MetricResult, StateSnapshot,
    TurnScore,
};

use crate::artifacts::{ArtifactStore, ConversationResult, RunResults};
use crate::config::RuntimeConfig;
use crate::embeddings::Embedder;
use crate::pipeline::TurnRecord;
use crate::semantic::semantic_similarity;
use crate::RuntimeError;

pub struct Scorer {
    artifacts: Arc<dyn ArtifactStore>,
    embedder: Option<Arc<dyn Embedder>>,
    semantic_threshold: f32,
}

impl Scorer {
    pub fn new(artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self {
            artifacts,
            embedder: None,
            semantic_threshold: DEFAULT_SEMANTIC_THRESHOLD,
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Threshold used when the eval config does not set `semantic`.
    pub fn with_semantic_threshold(mut self, threshold: f32) -> Self {
        self.semantic_threshold = threshold;
        self
    }

    /// Scorer with the configured threshold and, when the `ollama` feature
    /// is enabled, a cached Ollama embedder.
    pub fn from_config(
        config: &RuntimeConfig,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Result<Self, RuntimeError> {
        #[allow(unused_mut)]
        let mut scorer = Self::new(artifacts).with_semantic_threshold(config.semantic_threshold);

        #[cfg(feature = "ollama")]
        {
            use crate::embeddings::{CachedEmbedder, OllamaEmbedder};

            let inner = OllamaEmbedder::from_config(&config.providers, &config.embeddings)
                .map_err(|e| RuntimeError::Internal(e.to_string()))?;
            scorer = scorer.with_embedder(Arc::new(CachedEmbedder::new(
                Arc::new(inner),
                config.embeddings.cache_capacity,
                config.embeddings.cache_ttl,
            )));
        }

        Ok(scorer)
    }

    fn metrics_for(config: &EvalConfig) -> Vec<MetricKind> {
        if config.metrics.is_empty() {
            MetricKind::ALL.to_vec()
        } else {
            config.metrics.clone()
        }
    }

    fn threshold_for(&self, config: &EvalConfig) -> f32 {
        config
            .threshold(MetricKind::Semantic)
            .map(|t| t as f32)
            .unwrap_or(self.semantic_threshold)
    }

    /// Score one turn record.
    ///
    /// Consistency and hallucination see only the state extracted before
    /// the call, so the reply cannot vouch for its own facts. A failed
    /// provider call is not scored: it gets `turn_pass = false` and
    /// carries the provider error.
    pub async fn score_turn(
        &self,
        record: &TurnRecord,
        golden: &GoldenEntry,
        config: &EvalConfig,
    ) -> TurnScore {
        if !record.response.ok {
            return TurnScore {
                turn_index: record.reply_index,
                metrics: Vec::new(),
                turn_pass: Some(false),
                provider_error: Some(
                    record
                        .response
                        .error
                        .clone()
                        .unwrap_or_else(|| "provider call failed".to_string()),
                ),
            };
        }

        let output = record.response.content.as_str();
        let variants = golden.variants_for(record.reply_index);
        let history = record.history();

        let mut metrics = Vec::new();
        for kind in Self::metrics_for(config) {
            let result = match kind {
                MetricKind::Exact => exact_match(output, variants),
                MetricKind::Semantic => self.semantic(output, variants, config).await,
                MetricKind::Consistency => consistency(output, &record.pre_state),
                MetricKind::Adherence => adherence(output, &golden.constraints),
                MetricKind::Hallucination => hallucination(output, &record.pre_state, &history),
            };
            metrics.push(result);
        }

        TurnScore {
            turn_index: record.reply_index,
            metrics,
            turn_pass: None,
            provider_error: None,
        }
    }

    async fn semantic(&self, output: &str, variants: &[String], config: &EvalConfig) -> MetricResult {
        let threshold = self.threshold_for(config);
        match &self.embedder {
            Some(embedder) => semantic_similarity(embedder.as_ref(), output, variants, threshold).await,
            None => MetricResult::Semantic {
                pass: false,
                reasons: vec!["no embedder configured".to_string()],
                score_max: 0.0,
                threshold,
                scores: Vec::new(),
                best_variant_index: None,
            },
        }
    }

    /// Score a conversation's records (ordered by turn index) and aggregate.
    ///
    /// The final state is the post-hoc state of the last record.
    pub async fn score_conversation(
        &self,
        records: &[TurnRecord],
        golden: &GoldenEntry,
        config: &EvalConfig,
    ) -> ConversationResult {
        let turns: Vec<TurnScore> = join_all(
            records
                .iter()
                .map(|record| self.score_turn(record, golden, config)),
        )
        .await;

        let final_state = records
            .last()
            .map(|r| r.state.clone())
            .unwrap_or_else(StateSnapshot::default);

        let summary = aggregate(
            &turns,
            &final_state,
            &golden.final_outcome,
            golden.weights.as_deref(),
        );

        ConversationResult {
            conversation_id: golden.conversation_id.clone(),
            summary,
            turns,
        }
    }

    /// Score every conversation of a run that has a golden entry and write
    /// `results.json`.
    pub async fn score_run(
        &self,
        run_id: &str,
        model_spec: &str,
        golden: &GoldenSet,
        config: &EvalConfig,
    ) -> Result<RunResults, RuntimeError> {
        let mut conversations = Vec::with_capacity(golden.entries.len());

        for entry in &golden.entries {
            let records = self
                .artifacts
                .read_turns(run_id, &entry.conversation_id)
                .await?;
            let result = self.score_conversation(&records, entry, config).await;
            tracing::debug!(
                run_id,
                conversation_id = %entry.conversation_id,
                turns = records.len(),
                pass = result.summary.conversation_pass,
                "Conversation scored"
            );
            conversations.push(result);
        }

        let results = RunResults {
            run_id: run_id.to_string(),
            dataset_id: golden.dataset_id.clone(),
            model_spec: model_spec.to_string(),
            conversations,
        };
        self.artifacts.write_results(run_id, &results).await?;

        tracing::info!(
            run_id,
            conversations = results.conversations.len(),
            pass_rate = results.pass_rate(),
            "Run scored"
        );
        Ok(results)
    }
}

impl std::fmt::Debug for Scorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scorer")
            .field("embedder", &self.embedder.as_ref().map(|e| e.model().to_string()))
            .field("semantic_threshold", &self.semantic_threshold)
            .finish()
    }
}
