use crate::patterns;
use crate::types::StateSnapshot;

use super::{CheckResult, MetricResult};

const AMOUNT_TOLERANCE: f64 = 1e-6;

/// Checks the output against the extracted state.
///
/// Each field is only compared when both the state and the output carry
/// a value for it.
pub fn consistency(output: &str, state: &StateSnapshot) -> MetricResult {
    let mut reasons = Vec::new();

    if let (Some(expected), Some(said)) = (state.decision, patterns::detect_decision(output)) {
        if expected != said {
            reasons.push(format!(
                "decision mismatch: state={}, output={}",
                expected, said
            ));
        }
    }

    if let Some(order_id) = &state.order_id {
        let output_ids = patterns::extract_order_ids(output);
        if output_ids.iter().any(|id| !id.eq_ignore_ascii_case(order_id)) {
            reasons.push(format!(
                "order_id contradiction: state={}, output_ids={:?}",
                order_id, output_ids
            ));
        }
    }

    if let Some(amount) = state.refund_amount {
        let output_refunds = patterns::extract_refund_amounts(output);
        if output_refunds
            .iter()
            .any(|x| (x - amount).abs() > AMOUNT_TOLERANCE)
        {
            reasons.push(format!(
                "refund_amount contradiction: state={}, output_refunds={:?}",
                amount, output_refunds
            ));
        }
    }

    MetricResult::Consistency(CheckResult::from_reasons(reasons))
}
