use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::extract::{Query, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use lru::LruCache;
use ragserve::embedder::jina::JinaEmbedder;
use ragserve::render::{join_rendered, render_passage};
use ragserve::{
    auth, DocumentStore, Embedder, EmbeddingTask, SearchControls, SearchPipeline, Summarizer,
    TableName,
};
use ragserve::{PostgresStore, SearchError};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "ragserve-api",
    about = "HTTP API serving ranked, neighbour-expanded passages to LLM agents"
)]
struct ApiCli {
    /// Address to bind the HTTP server to (host:port).
    #[arg(long, env = "RAGSERVE_BIND", default_value = "127.0.0.1:8081")]
    bind: String,

    /// Postgres connection string (postgres://...).
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Schema holding the chunk table.
    #[arg(long, env = "RAGSERVE_SCHEMA", default_value = "public")]
    schema: String,

    /// Table storing embedded chunks.
    #[arg(long, env = "RAGSERVE_TABLE", default_value = "chunks")]
    table: String,

    /// Shared API key callers must present; requests fail 500 when unset.
    #[arg(long, env = "API_KEY")]
    api_key: Option<String>,

    /// Embedding API key.
    #[arg(long, env = "RAGSERVE_EMBED_API_KEY")]
    embed_api_key: String,

    /// Base URL for the embeddings endpoint.
    #[arg(long, env = "RAGSERVE_EMBED_BASE", default_value = "https://api.jina.ai/v1")]
    embed_base_url: String,

    /// Embedding model identifier.
    #[arg(long, env = "RAGSERVE_EMBED_MODEL", default_value = "jina-embeddings-v3")]
    embed_model: String,

    /// Optional embedding dimension override.
    #[arg(long, env = "RAGSERVE_EMBED_DIMENSIONS")]
    embed_dimensions: Option<usize>,

    /// Seconds before embedding requests time out.
    #[arg(long, env = "RAGSERVE_EMBED_TIMEOUT_SECS", default_value_t = 30)]
    embed_timeout_secs: u64,

    /// Retry attempts for transient embedding errors.
    #[arg(long, env = "RAGSERVE_EMBED_MAX_RETRIES", default_value_t = 5)]
    embed_max_retries: usize,

    /// Max cached query embeddings kept in-memory (0 disables caching).
    #[arg(long, default_value_t = 1024)]
    embedding_cache_size: usize,

    /// Hits kept from the lexical engine.
    #[arg(long, default_value_t = 30)]
    text_k: usize,

    /// Hits kept from the vector engine.
    #[arg(long, default_value_t = 30)]
    vec_k: usize,

    /// ANN candidate pool size before the top-k cut.
    #[arg(long, default_value_t = 100)]
    num_candidates: usize,

    /// Fused chunks retained for section grouping.
    #[arg(long, default_value_t = 30)]
    max_chunks: usize,

    /// Reciprocal Rank Fusion constant (higher softens score differences).
    #[arg(long, default_value_t = 60.0)]
    rrf_k: f64,

    /// Weight of lexical ranks in the fused score.
    #[arg(long, default_value_t = 1.0)]
    text_weight: f64,

    /// Weight of vector ranks in the fused score.
    #[arg(long, default_value_t = 1.0)]
    vector_weight: f64,

    /// Summarize rendered passages with an LLM before responding.
    #[arg(long, env = "RAGSERVE_SUMMARIZE", default_value_t = false)]
    enable_search_summarization: bool,

    /// Anthropic API key used when summarization is enabled.
    #[arg(long, env = "ANTHROPIC_API_KEY", default_value = "")]
    anthropic_api_key: String,

    /// Anthropic model used for summarization.
    #[arg(
        long,
        env = "RAGSERVE_SUMMARY_MODEL",
        default_value = "claude-3-5-haiku-20241022"
    )]
    summary_model: String,
}

impl ApiCli {
    fn build_controls(&self) -> SearchControls {
        SearchControls {
            text_k: self.text_k,
            vec_k: self.vec_k,
            num_candidates: self.num_candidates.max(1),
            max_chunks: self.max_chunks,
            rrf_k: self.rrf_k.max(1.0),
            text_weight: self.text_weight,
            vector_weight: self.vector_weight,
            ..SearchControls::default()
        }
    }
}

/// Embedder wrapper caching query vectors across requests at the boundary.
struct CachedEmbedder {
    inner: JinaEmbedder,
    cache: Option<Mutex<LruCache<String, Vec<f32>>>>,
}

impl CachedEmbedder {
    fn new(inner: JinaEmbedder, capacity: usize) -> Self {
        let cache = NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap)));
        Self { inner, cache }
    }
}

#[async_trait]
impl Embedder for CachedEmbedder {
    async fn embed(
        &self,
        cancel: &CancellationToken,
        text: &str,
        task: EmbeddingTask,
    ) -> Result<Vec<f32>> {
        // Only query embeddings recur; passage embeddings stay uncached.
        if task != EmbeddingTask::RetrievalQuery {
            return self.inner.embed(cancel, text, task).await;
        }
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.lock().await.get(text).cloned() {
                return Ok(hit);
            }
        }
        let embedding = self.inner.embed(cancel, text, task).await?;
        if let Some(cache) = &self.cache {
            cache.lock().await.put(text.to_string(), embedding.clone());
        }
        Ok(embedding)
    }
}

#[derive(Clone)]
struct AppState {
    pipeline: SearchPipeline,
    store: Arc<dyn DocumentStore>,
    api_key: Option<Arc<str>>,
    summarizer: Option<Arc<Summarizer>>,
    root: CancellationToken,
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    #[serde(default)]
    query: Option<String>,
}

#[derive(Debug, Serialize)]
struct SourcesResponse {
    sources: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = ApiCli::parse();
    if cli.api_key.as_deref().map_or(true, str::is_empty) {
        warn!("API_KEY is not set; all authenticated routes will answer 500");
    }

    let table = TableName::new(cli.schema.clone(), cli.table.clone())?;
    let store: Arc<dyn DocumentStore> = Arc::new(
        PostgresStore::connect(&cli.database_url, table, cli.num_candidates).await?,
    );

    let embedder = JinaEmbedder::new(
        cli.embed_api_key.clone(),
        cli.embed_base_url.clone(),
        cli.embed_model.clone(),
        cli.embed_dimensions,
        Duration::from_secs(cli.embed_timeout_secs.max(1)),
        cli.embed_max_retries.max(1),
    )?;
    let embedder: Arc<dyn Embedder> =
        Arc::new(CachedEmbedder::new(embedder, cli.embedding_cache_size));

    let summarizer = if cli.enable_search_summarization {
        Some(Arc::new(Summarizer::new(
            cli.anthropic_api_key.clone(),
            cli.summary_model.clone(),
        )?))
    } else {
        None
    };

    let pipeline = SearchPipeline::new(Arc::clone(&store), embedder, cli.build_controls());
    let root = CancellationToken::new();
    let state = AppState {
        pipeline,
        store,
        api_key: cli.api_key.as_deref().map(Arc::from),
        summarizer,
        root: root.clone(),
    };

    let protected = Router::new()
        .route("/search", get(search_handler))
        .route("/metadata/sources", get(sources_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));
    let app = Router::new()
        .merge(protected)
        .route("/privacy-policy", get(privacy_policy_handler))
        .route("/healthz", get(healthz))
        .with_state(state);

    let addr: SocketAddr = cli
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", cli.bind))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "ragserve-api listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(root))
        .await
        .context("server shutdown")?;
    Ok(())
}

async fn shutdown_signal(root: CancellationToken) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        return;
    }
    info!("shutdown requested");
    root.cancel();
}

async fn require_api_key(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Err((status, body)) = auth::authorize(request.headers(), state.api_key.as_deref()) {
        warn!(path = %request.uri().path(), status = %status, "rejected request");
        return (status, body).into_response();
    }
    next.run(request).await
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn search_handler(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Response {
    let query = params.query.unwrap_or_default().trim().to_string();
    if query.is_empty() {
        return (StatusCode::BAD_REQUEST, "query parameter is required").into_response();
    }

    let cancel = state.root.child_token();
    // Dropping the handler (client disconnect) cancels the pipeline.
    let _guard = cancel.clone().drop_guard();

    let mut stream = state.pipeline.run(cancel.clone(), query.clone());
    let mut rendered = Vec::new();
    while let Some(event) = stream.recv().await {
        match event {
            Ok(passage) => rendered.push(render_passage(&passage)),
            Err(err) => {
                error!(error = %err, "search failed");
                let status = match err {
                    SearchError::InputInvalid => StatusCode::BAD_REQUEST,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                return (status, "search failed").into_response();
            }
        }
    }

    if let Some(summarizer) = &state.summarizer {
        for block in &mut rendered {
            match summarizer.summarize(&cancel, &query, block).await {
                Ok(summary) => *block = summary,
                Err(err) => {
                    // Serve the full rendering when the summariser is down.
                    warn!(error = %err, "summarisation failed");
                }
            }
        }
    }

    info!(query = %query, passages = rendered.len(), "query processed");
    (
        [(header::CONTENT_TYPE, "text/markdown; charset=utf-8")],
        join_rendered(&rendered),
    )
        .into_response()
}

async fn sources_handler(State(state): State<AppState>) -> Response {
    let cancel = state.root.child_token();
    match state.store.distinct_sources(&cancel).await {
        Ok(sources) => Json(SourcesResponse { sources }).into_response(),
        Err(err) => {
            error!(error = %err, "failed to fetch sources");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch sources").into_response()
        }
    }
}

async fn privacy_policy_handler() -> Html<&'static str> {
    Html(PRIVACY_POLICY_HTML)
}

const PRIVACY_POLICY_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <title>Privacy Policy</title>
</head>
<body>
  <h1>Privacy Policy</h1>
  <p>This service answers retrieval queries against a read-only document
  corpus. Queries are processed in memory and logged for operational
  purposes only; no user accounts, cookies, or tracking identifiers are
  used, and no query content is shared with third parties beyond the
  configured embedding and summarisation providers.</p>
</body>
</html>
"#;
