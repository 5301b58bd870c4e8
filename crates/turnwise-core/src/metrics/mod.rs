//! Per-turn metrics.
//!
//! Every metric is a pure function of the model output and its reference
//! data, and always returns a verdict with reasons; metrics never error.
//!
//! | Metric        | Reference data               | Severity |
//! |---------------|------------------------------|----------|
//! | exact         | golden variants              | normal   |
//! | semantic      | golden variants + embeddings | normal   |
//! | consistency   | extracted state              | normal   |
//! | adherence     | golden constraints           | high     |
//! | hallucination | history + extracted state    | high     |

mod adherence;
mod consistency;
mod exact;
mod hallucination;
mod semantic;

pub use adherence::adherence;
pub use consistency::consistency;
pub use exact::{exact_match, normalize_text};
pub use hallucination::hallucination;
pub use semantic::{cosine_similarity, score_similarity, DEFAULT_SEMANTIC_THRESHOLD};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Which metric produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Exact,
    Semantic,
    Consistency,
    Adherence,
    Hallucination,
}

impl MetricKind {
    pub const ALL: [MetricKind; 5] = [
        MetricKind::Exact,
        MetricKind::Semantic,
        MetricKind::Consistency,
        MetricKind::Adherence,
        MetricKind::Hallucination,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Exact => "exact",
            MetricKind::Semantic => "semantic",
            MetricKind::Consistency => "consistency",
            MetricKind::Adherence => "adherence",
            MetricKind::Hallucination => "hallucination",
        }
    }

    /// A failure of a high-severity metric on any turn voids the
    /// conversation pass.
    pub fn is_high_severity(&self) -> bool {
        matches!(self, MetricKind::Adherence | MetricKind::Hallucination)
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetricKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s.trim())
            .ok_or_else(|| format!("unknown metric: {}", s))
    }
}

/// Pass/fail plus the reasons behind a failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub pass: bool,
    #[serde(default)]
    pub reasons: Vec<String>,
}

impl CheckResult {
    /// A check passes exactly when it collected no reasons.
    pub fn from_reasons(reasons: Vec<String>) -> Self {
        Self {
            pass: reasons.is_empty(),
            reasons,
        }
    }
}

/// Tagged metric verdict, serialized as `{"metric": "<kind>", "pass": .., ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "metric", rename_all = "snake_case")]
pub enum MetricResult {
    Exact {
        pass: bool,
        #[serde(default)]
        reasons: Vec<String>,
        output_norm: String,
        variants_norm: Vec<String>,
    },
    Semantic {
        pass: bool,
        #[serde(default)]
        reasons: Vec<String>,
        score_max: f32,
        threshold: f32,
        scores: Vec<f32>,
        best_variant_index: Option<usize>,
    },
    Consistency(CheckResult),
    Adherence(CheckResult),
    Hallucination(CheckResult),
}

impl MetricResult {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricResult::Exact { .. } => MetricKind::Exact,
            MetricResult::Semantic { .. } => MetricKind::Semantic,
            MetricResult::Consistency(_) => MetricKind::Consistency,
            MetricResult::Adherence(_) => MetricKind::Adherence,
            MetricResult::Hallucination(_) => MetricKind::Hallucination,
        }
    }

    pub fn pass(&self) -> bool {
        match self {
            MetricResult::Exact { pass, .. } | MetricResult::Semantic { pass, .. } => *pass,
            MetricResult::Consistency(c)
            | MetricResult::Adherence(c)
            | MetricResult::Hallucination(c) => c.pass,
        }
    }

    pub fn reasons(&self) -> &[String] {
        match self {
            MetricResult::Exact { reasons, .. } | MetricResult::Semantic { reasons, .. } => reasons,
            MetricResult::Consistency(c)
            | MetricResult::Adherence(c)
            | MetricResult::Hallucination(c) => &c.reasons,
        }
    }
}

/// All metric results for one turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnScore {
    /// Transcript position of the scored assistant reply.
    pub turn_index: usize,

    pub metrics: Vec<MetricResult>,

    /// Explicit roll-up; when absent, exact or semantic pass counts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_pass: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_error: Option<String>,
}

impl TurnScore {
    pub fn get(&self, kind: MetricKind) -> Option<&MetricResult> {
        self.metrics.iter().find(|m| m.kind() == kind)
    }

    /// Whether the turn counts as passed for the weighted pass rate.
    pub fn passed(&self) -> bool {
        if let Some(explicit) = self.turn_pass {
            return explicit;
        }
        [MetricKind::Exact, MetricKind::Semantic]
            .into_iter()
            .any(|k| self.get(k).is_some_and(MetricResult::pass))
    }
}
