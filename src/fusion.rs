//! Rank collection and Reciprocal Rank Fusion over per-engine hit lists.
//!
//! Each engine's ordered hits become an id → 1-based rank map; the fused
//! score of an id is `Σ_e weight_e / (rrf_k + rank_e(id))` over the engines
//! that ranked it. Ranks are fused rather than raw scores: BM25 magnitudes
//! and cosine similarities occupy incompatible scales.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};

use crate::model::{Chunk, Identified, SearchHit};

/// id → 1-based rank from one engine's ordered hit list.
///
/// When the same id appears more than once, the first (best-ranked)
/// occurrence keeps its rank.
pub fn collect_ranks<T: Identified>(hits: &[SearchHit<T>]) -> HashMap<String, usize> {
    let mut ranks = HashMap::with_capacity(hits.len());
    for (i, hit) in hits.iter().enumerate() {
        ranks.entry(hit.doc.chunk_id().to_string()).or_insert(i + 1);
    }
    ranks
}

/// Rank map plus a chunk cache from a lexical hit list that inlines records.
///
/// The cache lets the materialisation step skip a store round-trip for ids
/// the lexical engine already returned in full.
pub fn collect_ranks_with_cache(
    hits: Vec<SearchHit<Chunk>>,
) -> (HashMap<String, usize>, HashMap<String, Chunk>) {
    let mut ranks = HashMap::with_capacity(hits.len());
    let mut cache = HashMap::with_capacity(hits.len());
    for (i, hit) in hits.into_iter().enumerate() {
        let id = hit.doc.chunk_id.clone();
        if !ranks.contains_key(&id) {
            ranks.insert(id.clone(), i + 1);
            cache.insert(id, hit.doc);
        }
    }
    (ranks, cache)
}

/// One engine's contribution to the fused score.
#[derive(Debug, Clone)]
pub struct RankSource {
    /// Engine weight in the fused sum.
    pub weight: f64,
    /// id → 1-based rank inside this engine's list.
    pub ranks: HashMap<String, usize>,
}

// Total order for heap selection: higher score wins, equal scores order by
// chunk id ascending so repeated runs emit identical sequences.
#[derive(Debug, Clone, PartialEq)]
struct Scored {
    score: f64,
    id: String,
}

impl Eq for Scored {}

impl Ord for Scored {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Fuse rank maps and keep the best `max_chunks` ids, best first.
///
/// Selection uses a bounded min-heap: push every candidate, evict the worst
/// once the heap grows past `max_chunks`.
pub fn fuse_top_ids(sources: &[RankSource], rrf_k: f64, max_chunks: usize) -> Vec<String> {
    let mut combined: HashMap<String, f64> = HashMap::new();
    for source in sources {
        for (id, rank) in &source.ranks {
            *combined.entry(id.clone()).or_insert(0.0) += source.weight / (rrf_k + *rank as f64);
        }
    }

    let mut heap: BinaryHeap<Reverse<Scored>> = BinaryHeap::with_capacity(max_chunks + 1);
    for (id, score) in combined {
        heap.push(Reverse(Scored { score, id }));
        if heap.len() > max_chunks {
            heap.pop();
        }
    }

    // Min-heap pops worst-first; reverse for descending fused score.
    let mut ordered = Vec::with_capacity(heap.len());
    while let Some(Reverse(entry)) = heap.pop() {
        ordered.push(entry.id);
    }
    ordered.reverse();
    ordered
}
