//! Neighbour expansion and passage assembly for scored sections.

use std::collections::{HashMap, HashSet};

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::SearchError;
use crate::model::{Chunk, Passage};
use crate::sections::SectionBucket;
use crate::store::DocumentStore;

/// Deduplicated `prev → self → next` id list over a window-sorted section.
///
/// Empty pointer fields are skipped; the result is the minimal ordered id
/// set whose sentences form the neighbour-expanded passage.
pub fn neighbour_ids(chunks: &[Chunk]) -> Vec<String> {
    let mut added: HashSet<&str> = HashSet::with_capacity(chunks.len() * 3);
    let mut needed = Vec::with_capacity(chunks.len() * 3);
    for chunk in chunks {
        for id in [&chunk.prev_chunk_id, &chunk.chunk_id, &chunk.next_chunk_id] {
            if !id.is_empty() && added.insert(id.as_str()) {
                needed.push(id.clone());
            }
        }
    }
    needed
}

/// Resolve `ids` in order, serving from `cache` first and fetching the
/// remainder in a single batched store call.
///
/// Fetched chunks are folded back into the cache. A failed fetch is logged
/// and degrades to cache-only resolution; ids that resolve nowhere are
/// logged and skipped.
pub async fn resolve_chunks(
    store: &dyn DocumentStore,
    cancel: &CancellationToken,
    cache: &mut HashMap<String, Chunk>,
    ids: &[String],
) -> Vec<Chunk> {
    if ids.is_empty() {
        return Vec::new();
    }

    let missing: Vec<String> = ids
        .iter()
        .filter(|id| !cache.contains_key(*id))
        .cloned()
        .collect();

    if !missing.is_empty() {
        match store.find_by_ids(cancel, &missing).await {
            Ok(chunks) => {
                for chunk in chunks {
                    cache.insert(chunk.chunk_id.clone(), chunk);
                }
            }
            Err(err) => {
                // Cached chunks still flow; the passage just loses context.
                let err = SearchError::StoreFetch(err.to_string());
                warn!(error = %err, missing = missing.len(), "batched chunk fetch failed");
            }
        }
    }

    let mut ordered = Vec::with_capacity(ids.len());
    for id in ids {
        match cache.get(id) {
            Some(chunk) => ordered.push(chunk.clone()),
            None => warn!(chunk_id = %id, "chunk missing after lookup"),
        }
    }
    ordered
}

/// Assemble one section bucket into its neighbour-expanded passage.
///
/// The bucket's chunks are re-sorted into reading order, their neighbours
/// resolved through the request cache plus at most one batched fetch, and
/// the sentences concatenated in `neighbour_ids` order.
pub async fn assemble_passage(
    store: &dyn DocumentStore,
    cancel: &CancellationToken,
    cache: &mut HashMap<String, Chunk>,
    bucket: SectionBucket,
) -> Passage {
    let mut members = bucket.collected;
    members.sort_by_key(|chunk| chunk.window_index);

    for chunk in &members {
        cache
            .entry(chunk.chunk_id.clone())
            .or_insert_with(|| chunk.clone());
    }

    let needed = neighbour_ids(&members);
    let resolved = resolve_chunks(store, cancel, cache, &needed).await;

    let first = &members[0];
    let mut sentences = Vec::with_capacity(resolved.len() * 8);
    for chunk in &resolved {
        sentences.extend(chunk.sentences.iter().cloned());
    }

    Passage {
        id: first.section_id.clone(),
        title: first.title.clone(),
        attribution: first.source_uri.clone(),
        sentences,
    }
}
