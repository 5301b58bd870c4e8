//! Scoring half of the semantic similarity metric.
//!
//! Embedding is async and lives in the runtime; this module turns already
//! computed vectors into a verdict.

use super::MetricResult;

pub const DEFAULT_SEMANTIC_THRESHOLD: f32 = 0.80;

/// Cosine similarity. Returns 0.0 for mismatched lengths or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Score the output vector against every variant vector.
///
/// Passes iff the best score reaches `threshold`. With no variants the
/// result fails with a reason.
pub fn score_similarity(output: &[f32], variants: &[Vec<f32>], threshold: f32) -> MetricResult {
    let scores: Vec<f32> = variants
        .iter()
        .map(|v| cosine_similarity(output, v))
        .collect();

    // First index wins ties.
    let best = scores
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, s)| match best {
            Some((_, b)) if b >= s => best,
            _ => Some((i, s)),
        });

    let (best_variant_index, score_max) = match best {
        Some((i, s)) => (Some(i), s),
        None => (None, 0.0),
    };
    let pass = best.is_some() && score_max >= threshold;

    let reasons = match best {
        None => vec!["no expected variants".to_string()],
        Some(_) if !pass => vec![format!(
            "best similarity {:.3} below threshold {:.2}",
            score_max, threshold
        )],
        Some(_) => vec![],
    };

    MetricResult::Semantic {
        pass,
        reasons,
        score_max,
        threshold,
        scores,
        best_variant_index,
    }
}
