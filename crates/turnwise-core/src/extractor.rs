//! State extraction from a transcript prefix.
//!
//! The pipeline only depends on the [`StateExtractor`] contract: given a
//! domain and the transcript so far, return a [`StateSnapshot`]. The
//! default [`RegexStateExtractor`] reads the latest assistant turn, using
//! the model's `FINAL_STATE:` summary line when present and keyword
//! patterns otherwise.

use thiserror::Error;

use crate::patterns;
use crate::types::{Role, StateSnapshot, Turn};

/// Errors that can occur during state extraction.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Unsupported domain: {0}")]
    UnsupportedDomain(String),

    #[error("Extraction failed: {0}")]
    Failed(String),
}

/// Derives structured facts from a transcript.
///
/// Implementations must only look at `transcript`; the pipeline relies on
/// this to guarantee that state from turn *n* is never visible before
/// turn *n + 1*.
pub trait StateExtractor: Send + Sync {
    fn extract_state(
        &self,
        domain: &str,
        transcript: &[Turn],
    ) -> Result<StateSnapshot, ExtractionError>;
}

/// Pattern-based extractor for commerce support transcripts.
#[derive(Debug, Clone, Default)]
pub struct RegexStateExtractor {
    /// Domains this extractor accepts. Empty means any.
    domains: Vec<String>,
}

impl RegexStateExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict the extractor to the given domains.
    pub fn for_domains<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            domains: domains.into_iter().map(Into::into).collect(),
        }
    }

    fn accepts(&self, domain: &str) -> bool {
        self.domains.is_empty() || self.domains.iter().any(|d| d == domain)
    }

    fn from_summary_line(text: &str) -> Option<StateSnapshot> {
        let json = patterns::final_state_json(text)?;
        match serde_json::from_str::<serde_json::Value>(json) {
            Ok(value) => Some(snapshot_from_json(value)),
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring malformed FINAL_STATE line");
                None
            }
        }
    }

    fn from_keywords(text: &str) -> StateSnapshot {
        StateSnapshot {
            decision: patterns::detect_decision(text),
            refund_amount: patterns::extract_refund_amounts(text).last().copied(),
            policy_flags: patterns::detect_policy_flags(text)
                .into_iter()
                .map(str::to_string)
                .collect(),
            ..Default::default()
        }
    }
}

impl StateExtractor for RegexStateExtractor {
    fn extract_state(
        &self,
        domain: &str,
        transcript: &[Turn],
    ) -> Result<StateSnapshot, ExtractionError> {
        if !self.accepts(domain) {
            return Err(ExtractionError::UnsupportedDomain(domain.to_string()));
        }

        // Blank replies stand in for failed model calls and carry no state.
        let latest_reply = transcript
            .iter()
            .rev()
            .find(|t| t.role == Role::Assistant && !t.text.trim().is_empty())
            .map(|t| t.text.as_str());

        let mut state = match latest_reply {
            Some(text) => {
                Self::from_summary_line(text).unwrap_or_else(|| Self::from_keywords(text))
            }
            None => StateSnapshot::default(),
        };

        // The order id is usually given by the customer, so any turn counts.
        if state.order_id.is_none() {
            state.order_id = transcript
                .iter()
                .flat_map(|t| patterns::extract_order_ids(&t.text))
                .last();
        }

        Ok(state)
    }
}

/// Lenient conversion of a model-written summary into a snapshot.
///
/// Unknown decisions and non-numeric amounts are dropped rather than
/// rejected, since the summary is free model output.
fn snapshot_from_json(value: serde_json::Value) -> StateSnapshot {
    let mut state = StateSnapshot::default();
    let serde_json::Value::Object(map) = value else {
        return state;
    };

    for (key, v) in map {
        match key.as_str() {
            "decision" => state.decision = v.as_str().and_then(|s| s.parse().ok()),
            "order_id" => {
                state.order_id = v
                    .as_str()
                    .map(|s| s.to_string())
                    .or_else(|| v.as_u64().map(|n| n.to_string()))
                    .map(|s| s.to_ascii_uppercase())
            }
            "refund_amount" => {
                state.refund_amount = v
                    .as_f64()
                    .or_else(|| v.as_str().and_then(|s| s.trim_start_matches('$').parse().ok()))
            }
            "reason_code" => state.reason_code = v.as_str().map(str::to_string),
            "next_action" => state.next_action = v.as_str().map(str::to_string),
            "policy_flags" => {
                if let Some(flags) = v.as_array() {
                    state.policy_flags = flags
                        .iter()
                        .filter_map(|f| f.as_str().map(str::to_string))
                        .collect();
                }
            }
            _ if !v.is_null() => {
                state.extra.insert(key, v);
            }
            _ => {}
        }
    }

    state
}
