//! End-to-end pipeline scenarios over in-memory mock collaborators.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ragserve::{
    Chunk, DocumentStore, Embedder, EmbeddingTask, Passage, SearchControls, SearchError,
    SearchHit, SearchPipeline, VectorChunk,
};
use tokio_util::sync::CancellationToken;

fn chunk(id: &str, section: &str, window: i64, prev: &str, next: &str) -> Chunk {
    Chunk {
        chunk_id: id.to_string(),
        section_id: section.to_string(),
        window_index: window,
        prev_chunk_id: prev.to_string(),
        next_chunk_id: next.to_string(),
        title: format!("title-{section}"),
        source_uri: format!("source://{section}"),
        sentences: vec![format!("{id} sentence")],
    }
}

/// Mock corpus store: term/vector results are fixed id lists, `None`
/// simulating an engine failure. Batched fetches are counted and recorded.
struct MockStore {
    corpus: HashMap<String, Chunk>,
    term_results: Option<Vec<String>>,
    vector_results: Option<Vec<String>>,
    find_calls: AtomicUsize,
    find_requests: Mutex<Vec<Vec<String>>>,
    fail_find: bool,
}

impl MockStore {
    fn new(
        corpus: Vec<Chunk>,
        term_results: Option<Vec<&str>>,
        vector_results: Option<Vec<&str>>,
    ) -> Self {
        Self {
            corpus: corpus
                .into_iter()
                .map(|c| (c.chunk_id.clone(), c))
                .collect(),
            term_results: term_results.map(|ids| ids.iter().map(|s| s.to_string()).collect()),
            vector_results: vector_results.map(|ids| ids.iter().map(|s| s.to_string()).collect()),
            find_calls: AtomicUsize::new(0),
            find_requests: Mutex::new(Vec::new()),
            fail_find: false,
        }
    }
}

#[async_trait]
impl DocumentStore for MockStore {
    async fn term_search(
        &self,
        _cancel: &CancellationToken,
        _query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit<Chunk>>> {
        let ids = self
            .term_results
            .as_ref()
            .ok_or_else(|| anyhow!("lexical engine down"))?;
        Ok(ids
            .iter()
            .take(limit)
            .map(|id| SearchHit {
                doc: self.corpus[id].clone(),
                score: 1.0,
            })
            .collect())
    }

    async fn vector_search(
        &self,
        _cancel: &CancellationToken,
        _embedding: &[f32],
        k: usize,
        _num_candidates: usize,
    ) -> Result<Vec<SearchHit<VectorChunk>>> {
        let ids = self
            .vector_results
            .as_ref()
            .ok_or_else(|| anyhow!("vector engine down"))?;
        Ok(ids
            .iter()
            .take(k)
            .map(|id| SearchHit {
                doc: VectorChunk {
                    chunk_id: id.clone(),
                },
                score: 0.1,
            })
            .collect())
    }

    async fn find_by_ids(&self, cancel: &CancellationToken, ids: &[String]) -> Result<Vec<Chunk>> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        self.find_requests.lock().unwrap().push(ids.to_vec());
        if cancel.is_cancelled() {
            return Err(anyhow!("store call cancelled"));
        }
        if self.fail_find {
            return Err(anyhow!("store fetch down"));
        }
        Ok(ids
            .iter()
            .filter_map(|id| self.corpus.get(id).cloned())
            .collect())
    }

    async fn distinct_sources(&self, _cancel: &CancellationToken) -> Result<Vec<String>> {
        let mut sources: Vec<String> =
            self.corpus.values().map(|c| c.source_uri.clone()).collect();
        sources.sort();
        sources.dedup();
        Ok(sources)
    }
}

struct MockEmbedder {
    fail: bool,
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(
        &self,
        _cancel: &CancellationToken,
        _text: &str,
        _task: EmbeddingTask,
    ) -> Result<Vec<f32>> {
        if self.fail {
            return Err(anyhow!("embedding provider down"));
        }
        Ok(vec![0.0; 8])
    }
}

async fn collect(
    store: Arc<MockStore>,
    embedder: MockEmbedder,
    controls: SearchControls,
) -> Vec<Result<Passage, SearchError>> {
    let pipeline = SearchPipeline::new(store, Arc::new(embedder), controls);
    let mut rx = pipeline.run(CancellationToken::new(), "test query".to_string());
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

fn passages(events: Vec<Result<Passage, SearchError>>) -> Vec<Passage> {
    events
        .into_iter()
        .map(|event| event.expect("expected passage, got error"))
        .collect()
}

#[tokio::test]
async fn single_hit_in_both_engines_yields_one_passage() {
    let store = Arc::new(MockStore::new(
        vec![chunk("a", "s1", 1, "", "")],
        Some(vec!["a"]),
        Some(vec!["a"]),
    ));
    let out = passages(collect(store, MockEmbedder { fail: false }, SearchControls::default()).await);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].id, "s1");
    assert_eq!(out[0].title, "title-s1");
    assert_eq!(out[0].attribution, "source://s1");
    assert_eq!(out[0].sentences, vec!["a sentence"]);
}

#[tokio::test]
async fn disjoint_top_hits_order_by_fused_score() {
    // Lexical=[A, B], Vector=[C, A] over distinct sections:
    // A = 1/61 + 1/62, C = 1/61, B = 1/62, so sections come out sa, sc, sb.
    let store = Arc::new(MockStore::new(
        vec![
            chunk("a", "sa", 1, "", ""),
            chunk("b", "sb", 1, "", ""),
            chunk("c", "sc", 1, "", ""),
        ],
        Some(vec!["a", "b"]),
        Some(vec!["c", "a"]),
    ));
    let out = passages(collect(store, MockEmbedder { fail: false }, SearchControls::default()).await);
    let ids: Vec<&str> = out.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["sa", "sc", "sb"]);
}

#[tokio::test]
async fn adjacent_chunks_expand_with_their_neighbours() {
    // A (window 5) and B (window 6) share a section; the passage must read
    // prev-of-A, A, B, next-of-B.
    let store = Arc::new(MockStore::new(
        vec![
            chunk("p", "s", 4, "", "a"),
            chunk("a", "s", 5, "p", "b"),
            chunk("b", "s", 6, "a", "n"),
            chunk("n", "s", 7, "b", ""),
        ],
        Some(vec!["a", "b"]),
        Some(vec![]),
    ));
    let out = passages(collect(store, MockEmbedder { fail: false }, SearchControls::default()).await);
    assert_eq!(out.len(), 1);
    assert_eq!(
        out[0].sentences,
        vec!["p sentence", "a sentence", "b sentence", "n sentence"]
    );
}

#[tokio::test]
async fn neighbours_resolve_in_one_batched_fetch_per_section() {
    // X and Y arrive inlined from the lexical engine, so the only store
    // fetch is the section's neighbour batch covering all four missing ids.
    let store = Arc::new(MockStore::new(
        vec![
            chunk("xp", "s", 0, "", "x"),
            chunk("x", "s", 1, "xp", "xn"),
            chunk("xn", "s", 2, "x", "y"),
            chunk("y", "s", 3, "xn", "yn"),
            chunk("yn", "s", 4, "y", ""),
        ],
        Some(vec!["x", "y"]),
        Some(vec![]),
    ));
    let out = passages(collect(
        Arc::clone(&store),
        MockEmbedder { fail: false },
        SearchControls::default(),
    )
    .await);
    assert_eq!(out.len(), 1);
    assert_eq!(store.find_calls.load(Ordering::SeqCst), 1);
    let mut requested = store.find_requests.lock().unwrap()[0].clone();
    requested.sort();
    assert_eq!(requested, vec!["xn", "xp", "yn"]);
    assert_eq!(
        out[0].sentences,
        vec![
            "xp sentence",
            "x sentence",
            "xn sentence",
            "y sentence",
            "yn sentence"
        ]
    );
}

#[tokio::test]
async fn vector_engine_failure_degrades_to_lexical_only() {
    let store = Arc::new(MockStore::new(
        vec![
            chunk("a", "sa", 1, "", ""),
            chunk("b", "sb", 1, "", ""),
            chunk("c", "sc", 1, "", ""),
        ],
        Some(vec!["a", "b", "c"]),
        None,
    ));
    let out = passages(collect(store, MockEmbedder { fail: false }, SearchControls::default()).await);
    let ids: Vec<&str> = out.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["sa", "sb", "sc"]);
}

#[tokio::test]
async fn embedding_failure_degrades_to_lexical_only() {
    let store = Arc::new(MockStore::new(
        vec![chunk("a", "sa", 1, "", "")],
        Some(vec!["a"]),
        Some(vec!["a"]),
    ));
    let out = passages(collect(store, MockEmbedder { fail: true }, SearchControls::default()).await);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].id, "sa");
}

#[tokio::test]
async fn lexical_failure_degrades_to_vector_only() {
    let store = Arc::new(MockStore::new(
        vec![chunk("a", "sa", 1, "", "")],
        None,
        Some(vec!["a"]),
    ));
    let out = passages(collect(store, MockEmbedder { fail: false }, SearchControls::default()).await);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].id, "sa");
}

#[tokio::test]
async fn both_engines_failing_emit_a_single_error() {
    let store = Arc::new(MockStore::new(vec![], None, None));
    let events = collect(store, MockEmbedder { fail: true }, SearchControls::default()).await;
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], Err(SearchError::NoSignal(_))));
}

#[tokio::test]
async fn embedding_failure_with_zero_lexical_hits_emits_an_error() {
    let store = Arc::new(MockStore::new(vec![], Some(vec![]), Some(vec![])));
    let events = collect(store, MockEmbedder { fail: true }, SearchControls::default()).await;
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], Err(SearchError::NoSignal(_))));
}

#[tokio::test]
async fn zero_hits_everywhere_close_the_stream_silently() {
    let store = Arc::new(MockStore::new(vec![], Some(vec![]), Some(vec![])));
    let events = collect(store, MockEmbedder { fail: false }, SearchControls::default()).await;
    assert!(events.is_empty());
}

#[tokio::test]
async fn zero_max_chunks_yields_no_passages() {
    let store = Arc::new(MockStore::new(
        vec![chunk("a", "sa", 1, "", "")],
        Some(vec!["a"]),
        Some(vec!["a"]),
    ));
    let controls = SearchControls {
        max_chunks: 0,
        ..SearchControls::default()
    };
    let events = collect(store, MockEmbedder { fail: false }, controls).await;
    assert!(events.is_empty());
}

#[tokio::test]
async fn empty_query_surfaces_input_invalid() {
    let store = Arc::new(MockStore::new(vec![], Some(vec![]), Some(vec![])));
    let pipeline = SearchPipeline::new(
        store,
        Arc::new(MockEmbedder { fail: false }),
        SearchControls::default(),
    );
    let mut rx = pipeline.run(CancellationToken::new(), "   ".to_string());
    let event = rx.recv().await.expect("one event");
    assert!(matches!(event, Err(SearchError::InputInvalid)));
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn identical_inputs_produce_identical_output() {
    let corpus = vec![
        chunk("a", "sa", 1, "", ""),
        chunk("b", "sb", 1, "", ""),
        chunk("c", "sc", 1, "", ""),
        chunk("d", "sa", 2, "", ""),
    ];
    let mut runs = Vec::new();
    for _ in 0..2 {
        let store = Arc::new(MockStore::new(
            corpus.clone(),
            Some(vec!["a", "b", "d"]),
            Some(vec!["c", "b"]),
        ));
        runs.push(passages(
            collect(store, MockEmbedder { fail: false }, SearchControls::default()).await,
        ));
    }
    assert_eq!(runs[0], runs[1]);
}

#[tokio::test]
async fn cache_is_an_optimisation_only() {
    // Chunks served inline by the lexical engine and chunks fetched from the
    // store must assemble the same passages. Vector-only ranks force every
    // materialisation through `find_by_ids`.
    let corpus = vec![
        chunk("a", "sa", 1, "", "b"),
        chunk("b", "sa", 2, "a", ""),
    ];
    let inline = Arc::new(MockStore::new(
        corpus.clone(),
        Some(vec!["a", "b"]),
        Some(vec![]),
    ));
    let fetched = Arc::new(MockStore::new(
        corpus,
        Some(vec![]),
        Some(vec!["a", "b"]),
    ));
    let from_inline = passages(
        collect(inline, MockEmbedder { fail: false }, SearchControls::default()).await,
    );
    let from_store = passages(
        collect(fetched, MockEmbedder { fail: false }, SearchControls::default()).await,
    );
    assert_eq!(from_inline, from_store);
}

#[tokio::test]
async fn failed_neighbour_fetch_keeps_cached_chunks() {
    let mut store = MockStore::new(
        vec![chunk("a", "sa", 1, "missing-prev", "missing-next")],
        Some(vec!["a"]),
        Some(vec![]),
    );
    store.fail_find = true;
    let out = passages(collect(
        Arc::new(store),
        MockEmbedder { fail: false },
        SearchControls::default(),
    )
    .await);
    assert_eq!(out.len(), 1);
    // Neighbours were unreachable; the collected chunk still forms the passage.
    assert_eq!(out[0].sentences, vec!["a sentence"]);
}

#[tokio::test(flavor = "current_thread")]
async fn cancellation_mid_assembly_closes_the_stream() {
    let corpus = vec![
        chunk("a", "sa", 1, "", ""),
        chunk("b", "sb", 1, "", ""),
        chunk("c", "sc", 1, "", ""),
    ];
    let store = Arc::new(MockStore::new(
        corpus,
        Some(vec!["a", "b", "c"]),
        Some(vec![]),
    ));
    let controls = SearchControls {
        stream_buffer: 1,
        ..SearchControls::default()
    };
    let pipeline = SearchPipeline::new(
        store,
        Arc::new(MockEmbedder { fail: false }),
        controls,
    );
    let cancel = CancellationToken::new();
    let mut rx = pipeline.run(cancel.clone(), "test query".to_string());

    let first = rx.recv().await.expect("first passage");
    assert!(first.is_ok());
    cancel.cancel();

    // At most one already-buffered passage may still arrive; the stream then
    // closes without an error event.
    let mut trailing = 0;
    while let Some(event) = rx.recv().await {
        assert!(event.is_ok());
        trailing += 1;
    }
    assert!(trailing <= 1, "got {trailing} passages after cancellation");
}
