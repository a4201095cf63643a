//! Embedding provider contract and clients.

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub mod jina;

/// Task hint forwarded to providers that encode queries and passages
/// asymmetrically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingTask {
    /// Encode a retrieval query.
    RetrievalQuery,
    /// Encode a passage for indexing.
    RetrievalPassage,
}

impl EmbeddingTask {
    /// Wire value understood by Jina-style endpoints.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RetrievalQuery => "retrieval.query",
            Self::RetrievalPassage => "retrieval.passage",
        }
    }
}

/// Maps text to a unit-normed dense vector suitable for the configured
/// vector index. Shared across requests; must be safe under concurrent use.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed one text with the given task hint.
    async fn embed(
        &self,
        cancel: &CancellationToken,
        text: &str,
        task: EmbeddingTask,
    ) -> Result<Vec<f32>>;
}
