//! # turnwise-runtime
//!
//! Async execution half of the turnwise evaluation engine.
//!
//! This crate drives models through scripted conversations and persists
//! what happened, leaving all judgement to `turnwise-core`:
//! - [`Orchestrator`]: job lifecycle, run identity, cancellation, pause/resume
//! - [`TurnPipeline`]: extract state → build context → call provider → persist
//! - [`Scorer`]: runs metrics and the aggregator over persisted turn records
//! - provider adapters (`ollama`, `openai`, `gemini` features) and embeddings
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use turnwise_runtime::{Orchestrator, RuntimeConfig};
//!
//! let config = RuntimeConfig::from_env()?;
//! let orchestrator = Orchestrator::from_config(&config, datasets)?;
//!
//! let job = orchestrator.submit("demo", "ollama:llama3.2", eval_config).await?;
//! orchestrator.start(&job.job_id)?;
//! let finished = orchestrator.wait(&job.job_id).await?;
//! println!("{} -> {:?}", finished.run_id, finished.state);
//! ```

pub mod artifacts;
pub mod config;
pub mod dataset;
pub mod embeddings;
pub mod orchestrator;
pub mod pipeline;
pub mod providers;
pub mod scorer;
pub mod semantic;

pub use artifacts::{
    ArtifactError, ArtifactStore, ConversationResult, FsArtifactStore, MemoryArtifactStore,
    RunResults,
};
pub use config::{ConfigError, EmbeddingConfig, ProviderConfig, RuntimeConfig};
pub use dataset::{DatasetRepository, InMemoryDatasetRepository};
pub use embeddings::{CachedEmbedder, Embedder, EmbeddingError};
pub use orchestrator::{progress_pct, Job, JobRegistry, JobState, JobStatus, Orchestrator, RunSettings};
pub use pipeline::{RecordedRequest, Timestamps, TurnPipeline, TurnRecord, TurnRequest};
pub use providers::{
    ChatProvider, ChatRequest, Completion, ProviderError, ProviderRegistry, ProviderResponse,
};
pub use scorer::Scorer;
pub use semantic::semantic_similarity;

use thiserror::Error;

use turnwise_core::{ContextError, ExtractionError, RunIdError};

/// Errors from the runtime.
///
/// Provider failures are not errors here: they are recorded on the turn
/// record with `ok = false`.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("State extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Context building failed: {0}")]
    Context(#[from] ContextError),

    #[error("Artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl RuntimeError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        RuntimeError::NotFound {
            kind,
            id: id.into(),
        }
    }
}

impl From<RunIdError> for RuntimeError {
    fn from(err: RunIdError) -> Self {
        match err {
            RunIdError::InvalidModelSpec(_) => RuntimeError::InvalidArgument(err.to_string()),
            RunIdError::Serialize(_) => RuntimeError::Internal(err.to_string()),
        }
    }
}

/// Install a `tracing` fmt subscriber filtered by `RUST_LOG` (default `info`).
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
