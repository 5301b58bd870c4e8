use super::MetricResult;

/// Case-fold, trim and collapse runs of whitespace to one space.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Passes iff the normalized output equals any normalized variant.
pub fn exact_match(output: &str, variants: &[String]) -> MetricResult {
    let output_norm = normalize_text(output);
    let variants_norm: Vec<String> = variants.iter().map(|v| normalize_text(v)).collect();
    let pass = variants_norm.iter().any(|v| *v == output_norm);

    let reasons = if pass {
        vec![]
    } else if variants_norm.is_empty() {
        vec!["no expected variants".to_string()]
    } else {
        vec!["output does not match any expected variant".to_string()]
    };

    MetricResult::Exact {
        pass,
        reasons,
        output_norm,
        variants_norm,
    }
}
