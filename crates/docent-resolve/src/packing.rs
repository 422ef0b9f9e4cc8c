//! Context packing: delivery order of the final evidence set.

use docent_core::PackingStrategy;

use crate::types::RankedChunk;

/// Reorder `ranked` for delivery. Membership never changes.
pub fn pack(mut ranked: Vec<RankedChunk>, strategy: PackingStrategy) -> Vec<RankedChunk> {
    match strategy {
        PackingStrategy::Reverse => ranked.sort_by(|a, b| b.rank.cmp(&a.rank)),
        PackingStrategy::Forward => ranked.sort_by_key(|c| c.rank),
        PackingStrategy::None => {}
    }
    ranked
}
