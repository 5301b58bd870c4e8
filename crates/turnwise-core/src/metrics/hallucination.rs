use std::collections::BTreeSet;

use crate::patterns;
use crate::types::StateSnapshot;

use super::{CheckResult, MetricResult};

/// Flags order ids and amounts in the output that neither the prior
/// history nor the extracted state mention.
pub fn hallucination<S: AsRef<str>>(output: &str, state: &StateSnapshot, history: &[S]) -> MetricResult {
    let mut known_ids: BTreeSet<String> = history
        .iter()
        .flat_map(|h| patterns::extract_order_ids(h.as_ref()))
        .collect();
    if let Some(id) = &state.order_id {
        known_ids.insert(id.to_ascii_uppercase());
    }

    let mut known_amounts: Vec<f64> = history
        .iter()
        .flat_map(|h| patterns::extract_amounts(h.as_ref()))
        .collect();
    known_amounts.extend(state.known_amounts());

    let unseen_ids: Vec<String> = patterns::extract_order_ids(output)
        .into_iter()
        .filter(|id| !known_ids.contains(id))
        .collect();
    let unseen_amounts: Vec<f64> = patterns::extract_amounts(output)
        .into_iter()
        .filter(|a| !known_amounts.contains(a))
        .collect();

    let mut reasons = Vec::new();
    if !unseen_ids.is_empty() {
        reasons.push(format!("unseen order ids: {:?}", unseen_ids));
    }
    if !unseen_amounts.is_empty() {
        reasons.push(format!("unseen amounts: {:?}", unseen_amounts));
    }

    MetricResult::Hallucination(CheckResult::from_reasons(reasons))
}
