//! Embedding half of the semantic similarity metric.

use tracing::warn;

use turnwise_core::metrics::score_similarity;
use turnwise_core::MetricResult;

use crate::embeddings::Embedder;

fn failed(reason: String, threshold: f32) -> MetricResult {
    MetricResult::Semantic {
        pass: false,
        reasons: vec![reason],
        score_max: 0.0,
        threshold,
        scores: Vec::new(),
        best_variant_index: None,
    }
}

/// Embed `[output] + variants` in one batch and score the output against
/// each variant.
///
/// Embedding failures do not propagate: they yield a failing result whose
/// reason carries the error.
pub async fn semantic_similarity(
    embedder: &dyn Embedder,
    output: &str,
    variants: &[String],
    threshold: f32,
) -> MetricResult {
    if variants.is_empty() {
        return score_similarity(&[], &[], threshold);
    }

    let mut batch = Vec::with_capacity(variants.len() + 1);
    batch.push(output.to_string());
    batch.extend(variants.iter().cloned());

    match embedder.embed(&batch).await {
        Ok(vectors) if vectors.len() == batch.len() => {
            score_similarity(&vectors[0], &vectors[1..], threshold)
        }
        Ok(vectors) => failed(
            format!(
                "embedding failed: expected {} vectors, got {}",
                batch.len(),
                vectors.len()
            ),
            threshold,
        ),
        Err(err) => {
            warn!(model = embedder.model(), error = %err, "Embedding failed");
            failed(format!("embedding failed: {}", err), threshold)
        }
    }
}
