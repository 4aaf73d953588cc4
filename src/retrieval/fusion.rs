//! Reciprocal rank fusion of branch result lists.
//!
//! Fusion works on ranks alone, so the vector branch's similarities and the
//! lexical branch's BM25 values never need calibrating against each other.

use rustc_hash::FxHashMap;

/// Standard RRF dampening constant.
const RRF_K: f64 = 60.0;

/// A fused result: summed reciprocal-rank score plus the best rank the chunk
/// achieved in any single branch, kept for tie-breaking.
#[derive(Clone, Debug, PartialEq)]
pub struct FusedHit {
    pub chunk_id: String,
    pub score: f64,
    pub best_rank: usize,
}

/// Fuses ranked id lists. Each branch contributes `1 / (K + rank)` with ranks
/// starting at 1; chunks absent from a branch get nothing from it. Output is
/// ordered by score descending, then best single-branch rank, then chunk id,
/// so equal inputs always produce identical output.
pub fn fuse(branches: &[Vec<String>]) -> Vec<FusedHit> {
    let mut fused: FxHashMap<&str, FusedHit> = FxHashMap::default();
    for branch in branches {
        for (index, chunk_id) in branch.iter().enumerate() {
            let rank = index + 1;
            let contribution = 1.0 / (RRF_K + rank as f64);
            let entry = fused
                .entry(chunk_id.as_str())
                .or_insert_with(|| FusedHit {
                    chunk_id: chunk_id.clone(),
                    score: 0.0,
                    best_rank: rank,
                });
            entry.score += contribution;
            entry.best_rank = entry.best_rank.min(rank);
        }
    }
    let mut hits: Vec<FusedHit> = fused.into_values().collect();
    hits.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.best_rank.cmp(&b.best_rank))
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    hits
}
