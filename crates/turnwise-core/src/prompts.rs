//! System prompt sections for the assistant under evaluation.
//!
//! The prompt is composed in a fixed order so that identical scenarios
//! produce byte-identical prompts:
//! 1. Header (domain, behavior, axes)
//! 2. Role
//! 3. Safety/Policy excerpt
//! 4. Scenario facts
//! 5. Known state (only once something has been extracted)
//! 6. Output requirements

/// Role section shared by every commerce scenario.
pub const ROLE_PROMPT: &str = "You are a commerce assistant for a merchant app. \
Follow company policy strictly while being helpful and concise.";

/// Output requirements, including the machine-readable summary line the
/// state extractor looks for.
pub const OUTPUT_REQUIREMENTS: &str = r#"Output Requirements:
- Ask clarifying questions when needed; do not resolve prematurely.
- For the final answer, provide a policy-compliant, actionable resolution.
- Do not invent facts; rely only on Scenario Facts and the Safety/Policy excerpt.
- At the very end of your final answer, append a single line with a JSON summary in this exact form:
  FINAL_STATE: {"decision": "ALLOW|DENY|PARTIAL", "next_action": <string or null>, "refund_amount": <number or null>, "policy_flags": [<strings>] }
  Only include this once and keep it on a single line.
"#;

pub const NO_POLICY_TEXT: &str = "(no policy excerpt provided)";

pub const NO_FACTS_TEXT: &str = "(no scenario facts provided)";

/// Upper bound on the system prompt before token budgeting kicks in.
pub const SYSTEM_PROMPT_MAX_CHARS: usize = 6000;

/// Header line identifying the scenario.
pub fn header(domain: &str, behavior: Option<&str>, axes: &[(String, String)]) -> String {
    let axes_line = axes
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Domain: {} | Behavior: {} | Axes: {}",
        domain,
        behavior.unwrap_or("default"),
        axes_line
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_formats_axes_in_order() {
        let axes = vec![
            ("availability".to_string(), "in_stock".to_string()),
            ("price_sensitivity".to_string(), "high".to_string()),
        ];
        assert_eq!(
            header("commerce", Some("refund"), &axes),
            "Domain: commerce | Behavior: refund | Axes: availability=in_stock, price_sensitivity=high"
        );
    }

    #[test]
    fn test_output_requirements_mention_summary_line() {
        assert!(OUTPUT_REQUIREMENTS.contains("FINAL_STATE:"));
    }
}
