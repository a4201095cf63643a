//! Shared data model for chunks, engine hits, and assembled passages.

use serde::{Deserialize, Serialize};

/// Unit of indexed text: a contiguous run of sentences inside one section.
///
/// Chunks sharing a `section_id` are contiguous prose inside one logical
/// section of one document; sorting them by `window_index` restores reading
/// order. Identity is `chunk_id` alone.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Store-wide unique chunk identifier.
    pub chunk_id: String,
    /// Identifier of the containing section.
    pub section_id: String,
    /// Position of this chunk inside its section (monotone, not necessarily dense).
    pub window_index: i64,
    /// Chunk preceding this one in reading order; empty when none.
    #[serde(default)]
    pub prev_chunk_id: String,
    /// Chunk following this one in reading order; empty when none.
    #[serde(default)]
    pub next_chunk_id: String,
    /// Display title of the containing document/section.
    pub title: String,
    /// Attribution URL or identifier.
    pub source_uri: String,
    /// Ordered sentence bodies forming the chunk text.
    pub sentences: Vec<String>,
}

/// Dense-embedding companion row keyed by the same `chunk_id`.
///
/// Only the id reaches the pipeline; the vector never leaves the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorChunk {
    /// Chunk identifier shared with the lexical record.
    pub chunk_id: String,
}

/// One engine hit: the record plus the engine-relative relevance score.
///
/// The 1-based rank is implied by position in the returned list.
#[derive(Debug, Clone)]
pub struct SearchHit<T> {
    /// The matched record (full chunk for lexical, id-only for vector).
    pub doc: T,
    /// Engine-native score; never compared across engines.
    pub score: f64,
}

/// Anything carrying a chunk identity, for generic rank collection.
pub trait Identified {
    /// Chunk identifier of the record.
    fn chunk_id(&self) -> &str;
}

impl Identified for Chunk {
    fn chunk_id(&self) -> &str {
        &self.chunk_id
    }
}

impl Identified for VectorChunk {
    fn chunk_id(&self) -> &str {
        &self.chunk_id
    }
}

/// Assembled output unit: one section's chunks plus their immediate
/// neighbours, with attribution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Passage {
    /// Section identifier the passage was assembled from.
    pub id: String,
    /// Display title, taken from the section's first chunk in reading order.
    pub title: String,
    /// Source URL or identifier for attribution.
    pub attribution: String,
    /// Sentences in reading order across all resolved chunks.
    pub sentences: Vec<String>,
}
