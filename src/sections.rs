//! Rank-aware grouping of fused chunks into scored sections.

use std::collections::{HashMap, HashSet};

use crate::model::Chunk;

/// Base weight of a fused-rank contribution.
const BASE_WEIGHT: f64 = 1.0;
/// Exponent applied to the fused rank in the contribution weight.
const RANK_EXPONENT: f64 = 1.0;
/// Bonus multiplier when the window preceding a chunk's was already
/// contributed by an earlier-ranked chunk in the same section.
const ADJACENCY_BONUS: f64 = 0.15;
/// Soft cap applied once per section holding more than one chunk.
const DIMINISHING_LAMBDA: f64 = 0.10;

/// One section's surviving chunks plus the rank statistics that scored it.
#[derive(Debug, Clone)]
pub struct SectionBucket {
    /// Section identifier shared by the collected chunks.
    pub section_id: String,
    /// Chunks in the order encountered, i.e. descending fused score.
    pub collected: Vec<Chunk>,
    /// Aggregate section score after diminishing returns.
    pub score: f64,
    /// Best (lowest) fused rank observed in this section.
    pub best_rank: usize,
    seen_windows: HashSet<i64>,
}

fn rank_weight(rank: usize) -> f64 {
    BASE_WEIGHT / (rank as f64).powf(RANK_EXPONENT)
}

/// Bucket fused chunks by section and score each bucket.
///
/// `chunks` must be in descending fused-score order; the per-chunk rank, the
/// adjacency bonus, and `best_rank` are all defined relative to that order.
/// Returned buckets are non-empty and sorted by score descending, then best
/// rank ascending, then chunk count descending, then section id.
pub fn group_by_section(chunks: Vec<Chunk>) -> Vec<SectionBucket> {
    if chunks.is_empty() {
        return Vec::new();
    }

    let mut sections: HashMap<String, SectionBucket> = HashMap::with_capacity(chunks.len());

    for (i, chunk) in chunks.into_iter().enumerate() {
        let rank = i + 1;
        let bucket = sections
            .entry(chunk.section_id.clone())
            .or_insert_with(|| SectionBucket {
                section_id: chunk.section_id.clone(),
                collected: Vec::with_capacity(4),
                score: 0.0,
                best_rank: rank,
                seen_windows: HashSet::new(),
            });

        let w = rank_weight(rank);
        bucket.score += w;
        if bucket.seen_windows.contains(&(chunk.window_index - 1)) {
            bucket.score += ADJACENCY_BONUS * w;
        }
        bucket.seen_windows.insert(chunk.window_index);
        bucket.best_rank = bucket.best_rank.min(rank);
        bucket.collected.push(chunk);
    }

    let mut ordered: Vec<SectionBucket> = sections
        .into_values()
        .map(|mut bucket| {
            let count = bucket.collected.len();
            if count > 1 {
                bucket.score /= 1.0 + DIMINISHING_LAMBDA * (count - 1) as f64;
            }
            bucket
        })
        .collect();

    ordered.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.best_rank.cmp(&b.best_rank))
            .then_with(|| b.collected.len().cmp(&a.collected.len()))
            .then_with(|| a.section_id.cmp(&b.section_id))
    });
    ordered
}
