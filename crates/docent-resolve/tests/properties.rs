use std::collections::BTreeSet;

use docent_core::PackingStrategy;
use docent_index::Candidate;
use docent_resolve::{pack, rrf_fuse, RankedChunk};
use proptest::prelude::*;

fn cand(index: usize) -> Candidate {
    Candidate {
        chunk_id: format!("c{}", index),
        chunk_index: index,
        dense_score: 0.0,
        lexical_score_raw: 0.0,
        lexical_score_norm: 0.0,
        fused_score: 0.0,
        source_variant: None,
    }
}

/// Up to six ranked lists, each a distinct subset of 20 chunks in random order.
fn ranked_lists() -> impl Strategy<Value = Vec<Vec<Candidate>>> {
    prop::collection::vec(
        Just((0..20usize).collect::<Vec<_>>())
            .prop_shuffle()
            .prop_flat_map(|order| (Just(order), 0usize..=20))
            .prop_map(|(order, len)| order.into_iter().take(len).map(cand).collect()),
        0..6,
    )
}

proptest! {
    #[test]
    fn rrf_is_invariant_under_list_permutation(
        (lists, shuffled) in ranked_lists().prop_flat_map(|lists| {
            let shuffled = Just(lists.clone()).prop_shuffle();
            (Just(lists), shuffled)
        }),
        k in 1usize..100,
    ) {
        let a = rrf_fuse(&lists, k, usize::MAX);
        let b = rrf_fuse(&shuffled, k, usize::MAX);
        prop_assert_eq!(a, b);
    }

    #[test]
    fn rrf_scores_are_sorted_and_bounded(lists in ranked_lists(), k in 1usize..100, cap in 1usize..30) {
        let fused = rrf_fuse(&lists, k, cap);
        prop_assert!(fused.len() <= cap);
        for pair in fused.windows(2) {
            prop_assert!(pair[0].rrf_score >= pair[1].rrf_score);
        }
        for f in &fused {
            prop_assert!(f.hits >= 1 && f.hits <= lists.len());
            prop_assert!(f.rrf_score <= f.hits as f64 / (k as f64 + 1.0) + 1e-12);
        }
    }

    #[test]
    fn packing_is_a_permutation(n in 0usize..30) {
        let ranked: Vec<RankedChunk> = (0..n)
            .map(|i| RankedChunk { chunk_id: format!("c{}", i), rank: i + 1 })
            .collect();
        let expected: BTreeSet<(String, usize)> =
            ranked.iter().map(|r| (r.chunk_id.clone(), r.rank)).collect();

        for strategy in [PackingStrategy::Reverse, PackingStrategy::Forward, PackingStrategy::None] {
            let packed = pack(ranked.clone(), strategy);
            prop_assert_eq!(packed.len(), n);
            let got: BTreeSet<(String, usize)> =
                packed.iter().map(|r| (r.chunk_id.clone(), r.rank)).collect();
            prop_assert_eq!(&got, &expected);
        }
    }
}
