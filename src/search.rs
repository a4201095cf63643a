//! Hybrid search dispatcher: concurrent engines, fusion, and the passage
//! stream.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::SearchControls;
use crate::embedder::{Embedder, EmbeddingTask};
use crate::error::SearchError;
use crate::fusion::{collect_ranks, collect_ranks_with_cache, fuse_top_ids, RankSource};
use crate::model::{Chunk, Passage};
use crate::passages::{assemble_passage, resolve_chunks};
use crate::sections::group_by_section;
use crate::store::DocumentStore;

/// Streaming hybrid-retrieval pipeline over a shared store and embedder.
///
/// Every per-request structure (rank maps, chunk cache, section buckets)
/// lives and dies with the request; the pipeline itself holds no mutable
/// state and is cheap to clone into request tasks.
#[derive(Clone)]
pub struct SearchPipeline {
    store: Arc<dyn DocumentStore>,
    embedder: Arc<dyn Embedder>,
    controls: SearchControls,
}

impl SearchPipeline {
    /// Builds a pipeline over shared collaborators.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        embedder: Arc<dyn Embedder>,
        controls: SearchControls,
    ) -> Self {
        Self {
            store,
            embedder,
            controls,
        }
    }

    /// Launches the pipeline for one query.
    ///
    /// Passages arrive in section-score order. A single `Err` event means no
    /// retrieval signal survived; the stream then closes. Cancelling the
    /// token closes the stream promptly without emitting further passages.
    pub fn run(
        &self,
        cancel: CancellationToken,
        query: String,
    ) -> mpsc::Receiver<Result<Passage, SearchError>> {
        let (tx, rx) = mpsc::channel(self.controls.stream_buffer.max(1));
        let pipeline = self.clone();
        tokio::spawn(async move {
            pipeline.drive(cancel, query, tx).await;
        });
        rx
    }

    async fn drive(
        self,
        cancel: CancellationToken,
        query: String,
        tx: mpsc::Sender<Result<Passage, SearchError>>,
    ) {
        let (ranked, mut cache) = match self.hybrid_search(&cancel, &query).await {
            Ok(result) => result,
            Err(SearchError::Cancelled) => return,
            Err(err) => {
                warn!(error = %err, "hybrid search produced no result");
                let _ = tx.send(Err(err)).await;
                return;
            }
        };

        for bucket in group_by_section(ranked) {
            if cancel.is_cancelled() {
                return;
            }
            let passage =
                assemble_passage(self.store.as_ref(), &cancel, &mut cache, bucket).await;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                sent = tx.send(Ok(passage)) => {
                    if sent.is_err() {
                        // Receiver dropped; nobody is reading anymore.
                        return;
                    }
                }
            }
        }
    }

    /// Runs the lexical and embed-then-vector searches concurrently, fuses
    /// their ranks, and materialises the top-M chunks.
    ///
    /// Either engine failing empties its rank map; the call errors only when
    /// no rank survived and at least one engine actually failed.
    async fn hybrid_search(
        &self,
        cancel: &CancellationToken,
        query: &str,
    ) -> Result<(Vec<Chunk>, HashMap<String, Chunk>), SearchError> {
        if query.trim().is_empty() {
            return Err(SearchError::InputInvalid);
        }

        let text_task = {
            let store = Arc::clone(&self.store);
            let cancel = cancel.clone();
            let query = query.to_string();
            let limit = self.controls.text_k;
            tokio::spawn(async move {
                store
                    .term_search(&cancel, &query, limit)
                    .await
                    .map_err(|err| SearchError::Engine {
                        engine: "lexical",
                        message: err.to_string(),
                    })
            })
        };

        let vector_task = {
            let store = Arc::clone(&self.store);
            let embedder = Arc::clone(&self.embedder);
            let cancel = cancel.clone();
            let query = query.to_string();
            let k = self.controls.vec_k;
            let num_candidates = self.controls.num_candidates;
            tokio::spawn(async move {
                let embedding = embedder
                    .embed(&cancel, &query, EmbeddingTask::RetrievalQuery)
                    .await
                    .map_err(|err| SearchError::Embedding(err.to_string()))?;
                store
                    .vector_search(&cancel, &embedding, k, num_candidates)
                    .await
                    .map_err(|err| SearchError::Engine {
                        engine: "vector",
                        message: err.to_string(),
                    })
            })
        };

        let (text_hits, vector_hits) = tokio::join!(text_task, vector_task);
        let text_hits = text_hits.unwrap_or_else(|err| {
            Err(SearchError::Engine {
                engine: "lexical",
                message: format!("task failed: {err}"),
            })
        });
        let vector_hits = vector_hits.unwrap_or_else(|err| {
            Err(SearchError::Engine {
                engine: "vector",
                message: format!("task failed: {err}"),
            })
        });

        let mut failures: Vec<SearchError> = Vec::new();

        let (text_ranks, cache) = match text_hits {
            Ok(hits) => collect_ranks_with_cache(hits),
            Err(err) => {
                warn!(error = %err, "lexical search failed");
                failures.push(err);
                (HashMap::new(), HashMap::new())
            }
        };

        let vector_ranks = match vector_hits {
            Ok(hits) => collect_ranks(&hits),
            Err(err) => {
                warn!(error = %err, "vector search failed");
                failures.push(err);
                HashMap::new()
            }
        };

        if cancel.is_cancelled() {
            return Err(SearchError::Cancelled);
        }

        if text_ranks.is_empty() && vector_ranks.is_empty() && !failures.is_empty() {
            let detail = failures
                .iter()
                .map(SearchError::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(SearchError::NoSignal(detail));
        }

        let sources = [
            RankSource {
                weight: self.controls.text_weight,
                ranks: text_ranks,
            },
            RankSource {
                weight: self.controls.vector_weight,
                ranks: vector_ranks,
            },
        ];
        let ids = fuse_top_ids(&sources, self.controls.rrf_k, self.controls.max_chunks);
        info!(fused = ids.len(), "hybrid search fused rank lists");

        let mut cache = cache;
        let ranked = resolve_chunks(self.store.as_ref(), cancel, &mut cache, &ids).await;
        Ok((ranked, cache))
    }
}
