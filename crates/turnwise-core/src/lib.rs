//! # turnwise-core
//!
//! Deterministic half of the turnwise conversation evaluation engine.
//!
//! This crate holds everything that can be decided without I/O:
//! - the data model (datasets, transcripts, extracted state, golden data)
//! - state extraction and context building for each model call
//! - the per-turn metrics and the conversation aggregator
//! - run identity
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: metrics and aggregation are pure functions of their inputs
//! 2. **No model calls**: embeddings are computed by the runtime and passed in
//! 3. **Explainable**: every failing verdict carries human-readable reasons
//!
//! ## Example
//!
//! ```rust
//! use turnwise_core::{aggregate, metrics, ExpectedOutcome, StateSnapshot, TurnScore};
//!
//! let exact = metrics::exact_match("Refund of $10 processed", &["refund of $10 processed".into()]);
//! let turns = vec![TurnScore { turn_index: 1, metrics: vec![exact], ..Default::default() }];
//!
//! let verdict = aggregate(&turns, &StateSnapshot::default(), &ExpectedOutcome::default(), None);
//! assert_eq!(verdict.turns_passed, 1);
//! assert!(!verdict.conversation_pass); // no expected decision
//! ```

pub mod aggregator;
pub mod context;
pub mod extractor;
pub mod golden;
pub mod metrics;
pub mod patterns;
pub mod prompts;
pub mod run_id;
pub mod types;

// Re-export main types at crate root
pub use aggregator::{aggregate, check_final_outcome, ConversationVerdict, OutcomeCheck};
pub use context::{
    estimate_tokens, BuiltContext, ContextAudit, ContextBuilder, ContextError, GenerationParams,
    PromptContextBuilder,
};
pub use extractor::{ExtractionError, RegexStateExtractor, StateExtractor};
pub use golden::{Constraints, ExpectedOutcome, ExpectedReply, GoldenEntry, GoldenSet, GoldenTurn};
pub use metrics::{CheckResult, MetricKind, MetricResult, TurnScore};
pub use run_id::{compute_run_id, config_checksum, EvalConfig, ModelSpec, RunIdError};
pub use types::{
    ChatMessage, Conversation, ConversationMeta, Dataset, DatasetMetadata, Decision, Role,
    StateSnapshot, Turn,
};
