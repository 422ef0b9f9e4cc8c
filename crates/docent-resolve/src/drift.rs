//! Drift filter: drop query variants that wandered off the question.

use serde::Serialize;

use docent_index::cosine;

use crate::types::{QueryVariant, VariantKind};

/// Verdict for one variant, in variant order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriftDecision {
    pub kind: VariantKind,
    pub text: String,
    pub similarity: f32,
    pub kept: bool,
}

/// Judge every variant against `reference` (the primary query's vector).
///
/// Protected variants are always kept. Other variants below their threshold
/// are dropped, least similar first, but never more than half of all
/// variants.
pub fn judge_drift(
    variants: &[QueryVariant],
    reference: &[f32],
    threshold: f32,
    hyde_threshold: f32,
) -> Vec<DriftDecision> {
    let mut decisions: Vec<DriftDecision> = variants
        .iter()
        .map(|v| DriftDecision {
            kind: v.kind,
            text: v.text.clone(),
            similarity: cosine(reference, &v.vector),
            kept: true,
        })
        .collect();

    let mut below: Vec<usize> = decisions
        .iter()
        .enumerate()
        .filter(|(_, d)| {
            let limit = match d.kind {
                VariantKind::Hyde => hyde_threshold,
                _ => threshold,
            };
            !d.kind.is_protected() && d.similarity < limit
        })
        .map(|(i, _)| i)
        .collect();
    below.sort_by(|&a, &b| {
        decisions[a]
            .similarity
            .partial_cmp(&decisions[b].similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let max_drop = variants.len() / 2;
    for &i in below.iter().take(max_drop) {
        decisions[i].kept = false;
    }
    decisions
}
