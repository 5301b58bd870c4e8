//! Golden reference data: expected replies, outcomes and constraints.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::types::Decision;

/// Expected final outcome of a conversation.
///
/// Only `decision` is required for a pass; the other fields are compared
/// when present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpectedOutcome {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refund_amount: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_action: Option<String>,

    /// Subset match: every listed flag must be present in the final state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_flags: Option<BTreeSet<String>>,
}

/// Scenario constraints checked by the adherence metric.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refund_after_ship: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_refund: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpectedReply {
    #[serde(default)]
    pub variants: Vec<String>,
}

/// Expectation for one assistant reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoldenTurn {
    /// Transcript position of the assistant reply.
    pub turn_index: usize,
    pub expected: ExpectedReply,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoldenEntry {
    pub conversation_id: String,

    #[serde(default)]
    pub turns: Vec<GoldenTurn>,

    #[serde(default)]
    pub final_outcome: ExpectedOutcome,

    #[serde(default)]
    pub constraints: Constraints,

    /// Per-turn weights for the weighted pass rate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<Vec<f64>>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, JsonValue>,
}

impl GoldenEntry {
    /// Expected variants for the reply at `reply_index`; empty when the
    /// golden entry has no expectation for it.
    pub fn variants_for(&self, reply_index: usize) -> &[String] {
        self.turns
            .iter()
            .find(|t| t.turn_index == reply_index)
            .map(|t| t.expected.variants.as_slice())
            .unwrap_or(&[])
    }
}

/// A golden file: one entry per scored conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoldenSet {
    pub dataset_id: String,
    pub version: String,
    #[serde(default)]
    pub entries: Vec<GoldenEntry>,
}

impl GoldenSet {
    pub fn entry(&self, conversation_id: &str) -> Option<&GoldenEntry> {
        self.entries
            .iter()
            .find(|e| e.conversation_id == conversation_id)
    }
}
