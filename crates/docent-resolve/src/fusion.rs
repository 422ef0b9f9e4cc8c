//! Reciprocal Rank Fusion: score = Σ 1/(k + rank_i)
//!
//! Merges the per-variant ranked lists without comparing their raw scores.

use std::collections::{HashMap, HashSet};

use docent_index::Candidate;

use crate::types::FusedCandidate;

/// Fuse ranked candidate lists (best first, ranks are 1-based).
///
/// A chunk absent from a list contributes nothing for that list. Per-chunk
/// contributions are summed in a canonical order, so permuting `lists` yields
/// bit-identical scores. Ties break by best rank, then document order.
pub fn rrf_fuse(lists: &[Vec<Candidate>], k: usize, max_results: usize) -> Vec<FusedCandidate> {
    let mut ranks: HashMap<&str, (usize, Vec<usize>)> = HashMap::new();

    for list in lists {
        let mut seen = HashSet::new();
        for (pos, cand) in list.iter().enumerate() {
            if !seen.insert(cand.chunk_id.as_str()) {
                continue;
            }
            ranks
                .entry(cand.chunk_id.as_str())
                .or_insert_with(|| (cand.chunk_index, Vec::new()))
                .1
                .push(pos + 1);
        }
    }

    let mut fused: Vec<FusedCandidate> = ranks
        .into_iter()
        .map(|(id, (chunk_index, mut r))| {
            r.sort_unstable();
            let rrf_score = r.iter().map(|&rank| 1.0 / (k as f64 + rank as f64)).sum();
            FusedCandidate {
                chunk_id: id.to_string(),
                chunk_index,
                rrf_score,
                best_rank: r[0],
                hits: r.len(),
            }
        })
        .collect();

    fused.sort_by(|a, b| {
        b.rrf_score
            .partial_cmp(&a.rrf_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.best_rank.cmp(&b.best_rank))
            .then(a.chunk_index.cmp(&b.chunk_index))
    });
    fused.truncate(max_results);
    fused
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(id: &str, index: usize) -> Candidate {
        Candidate {
            chunk_id: id.into(),
            chunk_index: index,
            dense_score: 0.0,
            lexical_score_raw: 0.0,
            lexical_score_norm: 0.0,
            fused_score: 0.0,
            source_variant: None,
        }
    }

    fn ids(fused: &[FusedCandidate]) -> Vec<&str> {
        fused.iter().map(|f| f.chunk_id.as_str()).collect()
    }

    #[test]
    fn test_agreement_wins() {
        let lists = vec![
            vec![cand("a", 0), cand("b", 1), cand("c", 2)],
            vec![cand("b", 1), cand("a", 0), cand("d", 3)],
            vec![cand("b", 1), cand("c", 2)],
        ];
        let fused = rrf_fuse(&lists, 60, 10);
        assert_eq!(fused[0].chunk_id, "b");
        assert_eq!(fused[0].hits, 3);
        let expected = 1.0 / 61.0 + 1.0 / 61.0 + 1.0 / 62.0;
        assert!((fused[0].rrf_score - expected).abs() < 1e-12);
    }

    #[test]
    fn test_ties_break_by_best_rank_then_chunk_order() {
        let lists = vec![vec![cand("x", 5), cand("y", 2)], vec![cand("y", 2), cand("x", 5)]];
        let fused = rrf_fuse(&lists, 60, 10);
        // Equal score and best rank: document order decides.
        assert_eq!(ids(&fused), vec!["y", "x"]);
    }

    #[test]
    fn test_cap_and_empty() {
        let lists = vec![vec![cand("a", 0), cand("b", 1), cand("c", 2)]];
        assert_eq!(rrf_fuse(&lists, 60, 2).len(), 2);
        assert!(rrf_fuse(&[], 60, 10).is_empty());
    }

    #[test]
    fn test_single_list_keeps_order() {
        let lists = vec![vec![cand("c", 2), cand("a", 0), cand("b", 1)]];
        assert_eq!(ids(&rrf_fuse(&lists, 60, 10)), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_duplicate_within_list_counts_once() {
        let lists = vec![vec![cand("a", 0), cand("a", 0)]];
        let fused = rrf_fuse(&lists, 60, 10);
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].hits, 1);
    }
}
