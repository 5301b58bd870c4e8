use crate::golden::Constraints;
use crate::patterns;

use super::{CheckResult, MetricResult};

/// Checks the output against scenario constraints.
pub fn adherence(output: &str, constraints: &Constraints) -> MetricResult {
    let mut reasons = Vec::new();

    if constraints.refund_after_ship == Some(false) && patterns::promises_refund_after_shipping(output) {
        reasons.push("violates refund_after_ship=false".to_string());
    }

    if let Some(max_refund) = constraints.max_refund {
        let mut refunds = patterns::extract_refund_amounts(output);
        // Unlabelled amounts count once the output talks about a refund.
        if refunds.is_empty() && patterns::mentions_refund(output) {
            refunds = patterns::extract_amounts(output);
        }
        if refunds.iter().any(|x| *x > max_refund) {
            reasons.push(format!("refund exceeds max_refund={}", max_refund));
        }
    }

    MetricResult::Adherence(CheckResult::from_reasons(reasons))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_constraints_violated() {
        let constraints = Constraints {
            refund_after_ship: Some(false),
            max_refund: Some(10.0),
        };
        let result = adherence("We will process a refund after it's shipped of $25.", &constraints);
        assert!(!result.pass());
        assert_eq!(
            result.reasons(),
            ["violates refund_after_ship=false", "refund exceeds max_refund=10"]
        );
    }

    #[test]
    fn test_within_cap_passes() {
        let constraints = Constraints {
            refund_after_ship: Some(false),
            max_refund: Some(10.0),
        };
        assert!(adherence("I can issue a refund of $10 today.", &constraints).pass());
    }

    #[test]
    fn test_amounts_without_refund_are_ignored() {
        let constraints = Constraints {
            max_refund: Some(10.0),
            ..Default::default()
        };
        assert!(adherence("Your order total was $25.", &constraints).pass());
    }

    #[test]
    fn test_no_constraints_passes() {
        let result = adherence("We will refund after it's shipped, $500.", &Constraints::default());
        assert!(result.pass());
    }
}
