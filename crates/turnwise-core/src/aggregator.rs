//! Aggregator: combines per-turn verdicts into a conversation verdict.
//!
//! The aggregator applies the outcome-first rule:
//! 1. The final extracted state must match the expected outcome.
//! 2. No high-severity metric (adherence, hallucination) may fail on any turn.
//!
//! A conversation passes only when both hold. The weighted pass rate is
//! reported alongside but never changes the verdict.

use serde::{Deserialize, Serialize};

use crate::golden::ExpectedOutcome;
use crate::metrics::TurnScore;
use crate::types::StateSnapshot;

const AMOUNT_TOLERANCE: f64 = 1e-6;

/// Result of comparing the final state with the expected outcome.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutcomeCheck {
    pub pass: bool,
    pub reasons: Vec<String>,
}

/// Conversation-level verdict.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationVerdict {
    pub conversation_pass: bool,
    pub final_outcome: OutcomeCheck,
    pub high_severity_violation: bool,
    pub severity_reasons: Vec<String>,
    pub turns_total: usize,
    pub turns_passed: usize,
    pub weighted_pass_rate: f64,
}

/// Compare the final extracted state against the expected outcome.
pub fn check_final_outcome(final_state: &StateSnapshot, expected: &ExpectedOutcome) -> OutcomeCheck {
    let mut reasons = Vec::new();

    match expected.decision {
        None => reasons.push("expected decision missing".to_string()),
        Some(decision) if final_state.decision != Some(decision) => reasons.push(format!(
            "decision mismatch: expected={}, actual={}",
            decision,
            display_opt(final_state.decision.as_ref())
        )),
        Some(_) => {}
    }

    if let Some(amount) = expected.refund_amount {
        let matches = final_state
            .refund_amount
            .is_some_and(|actual| (actual - amount).abs() <= AMOUNT_TOLERANCE);
        if !matches {
            reasons.push(format!(
                "refund_amount mismatch: expected={}, actual={}",
                amount,
                display_opt(final_state.refund_amount.as_ref())
            ));
        }
    }

    let text_fields = [
        ("reason_code", &expected.reason_code, &final_state.reason_code),
        ("next_action", &expected.next_action, &final_state.next_action),
    ];
    for (name, want, got) in text_fields {
        if let Some(want) = want {
            if got.as_ref() != Some(want) {
                reasons.push(format!(
                    "{} mismatch: expected={}, actual={}",
                    name,
                    want,
                    display_opt(got.as_ref())
                ));
            }
        }
    }

    if let Some(flags) = &expected.policy_flags {
        let missing: Vec<&String> = flags
            .iter()
            .filter(|f| !final_state.policy_flags.contains(*f))
            .collect();
        if !missing.is_empty() {
            reasons.push(format!("missing policy_flags: {:?}", missing));
        }
    }

    OutcomeCheck {
        pass: reasons.is_empty(),
        reasons,
    }
}

fn display_opt<T: std::fmt::Display>(value: Option<&T>) -> String {
    value.map_or_else(|| "none".to_string(), |v| v.to_string())
}

/// Aggregate per-turn scores into a conversation verdict.
///
/// `weights[i]` applies to `turns[i]`; missing weights default to 1.0.
pub fn aggregate(
    turns: &[TurnScore],
    final_state: &StateSnapshot,
    expected: &ExpectedOutcome,
    weights: Option<&[f64]>,
) -> ConversationVerdict {
    let final_outcome = check_final_outcome(final_state, expected);

    let mut severity_reasons = Vec::new();
    for turn in turns {
        for metric in &turn.metrics {
            let kind = metric.kind();
            if kind.is_high_severity() && !metric.pass() {
                severity_reasons.push(format!("{} failed on turn {}", kind, turn.turn_index));
            }
        }
    }
    let high_severity_violation = !severity_reasons.is_empty();

    let weight_at = |i: usize| weights.and_then(|w| w.get(i).copied()).unwrap_or(1.0);

    let (turns_passed, weighted_pass_rate) = if turns.is_empty() {
        (0, 0.0)
    } else {
        let total_weight: f64 = (0..turns.len()).map(weight_at).sum();
        let norm = if total_weight > 0.0 { total_weight } else { 1.0 };

        let mut passed = 0;
        let mut passed_weight = 0.0;
        for (i, turn) in turns.iter().enumerate() {
            if turn.passed() {
                passed += 1;
                passed_weight += weight_at(i);
            }
        }
        (passed, passed_weight / norm)
    };

    ConversationVerdict {
        conversation_pass: final_outcome.pass && !high_severity_violation,
        final_outcome,
        high_severity_violation,
        severity_reasons,
        turns_total: turns.len(),
        turns_passed,
        weighted_pass_rate,
    }
}
