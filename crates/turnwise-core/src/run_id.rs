//! Run identity and model spec parsing.
//!
//! A run id is derived from the dataset, the model and the scoring-relevant
//! parts of the configuration, so re-running the same evaluation lands in
//! the same run directory.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::metrics::MetricKind;

/// Number of hex characters of the config checksum kept in a run id.
const CHECKSUM_LEN: usize = 8;

#[derive(Error, Debug)]
pub enum RunIdError {
    #[error("Invalid model spec '{0}': expected provider:model")]
    InvalidModelSpec(String),

    #[error("Failed to serialize run config: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Evaluation settings that take part in the run identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvalConfig {
    #[serde(default)]
    pub metrics: Vec<MetricKind>,

    /// Per-metric thresholds, e.g. `semantic: 0.85`.
    #[serde(default)]
    pub thresholds: BTreeMap<String, f64>,

    /// Free-form context recorded with the run.
    #[serde(default)]
    pub context: BTreeMap<String, JsonValue>,
}

impl EvalConfig {
    pub fn threshold(&self, metric: MetricKind) -> Option<f64> {
        self.thresholds.get(metric.as_str()).copied()
    }
}

/// `provider:model`, split at the first colon.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelSpec {
    pub provider: String,
    pub model: String,
}

impl ModelSpec {
    /// Parse a spec. The model half may itself contain colons
    /// (`ollama:llama3:8b`); both halves must be non-empty.
    pub fn parse(spec: &str) -> Result<Self, RunIdError> {
        match spec.split_once(':') {
            Some((provider, model)) if !provider.trim().is_empty() && !model.trim().is_empty() => {
                Ok(Self {
                    provider: provider.trim().to_string(),
                    model: model.trim().to_string(),
                })
            }
            _ => Err(RunIdError::InvalidModelSpec(spec.to_string())),
        }
    }
}

impl fmt::Display for ModelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.model)
    }
}

/// First eight hex characters of the SHA-256 of the canonical JSON of
/// `{metrics, thresholds, context}`.
pub fn config_checksum(config: &EvalConfig) -> Result<String, RunIdError> {
    // serde_json::Value keeps object keys sorted, which makes the
    // serialization canonical.
    let relevant = serde_json::json!({
        "metrics": serde_json::to_value(&config.metrics)?,
        "thresholds": serde_json::to_value(&config.thresholds)?,
        "context": serde_json::to_value(&config.context)?,
    });
    let blob = serde_json::to_vec(&relevant)?;

    let mut hasher = Sha256::new();
    hasher.update(&blob);
    let digest = hasher.finalize();

    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    Ok(hex[..CHECKSUM_LEN].to_string())
}

/// `{dataset_id}-{version}-{model_spec}-{checksum}`, with every character
/// outside `[A-Za-z0-9._-]` in the readable parts mapped to `-` so the id
/// is usable as a directory name. Model specs that differ only in those
/// characters share a prefix.
pub fn compute_run_id(
    dataset_id: &str,
    version: &str,
    model_spec: &str,
    config: &EvalConfig,
) -> Result<String, RunIdError> {
    let checksum = config_checksum(config)?;
    Ok(format!(
        "{}-{}-{}-{}",
        path_safe(dataset_id),
        path_safe(version),
        path_safe(model_spec),
        checksum
    ))
}

fn path_safe(part: &str) -> String {
    part.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect()
}
