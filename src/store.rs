//! Document store contract and the Postgres/pgvector implementation.

use anyhow::{Context, Result};
use async_trait::async_trait;
use pgvector::Vector;
use tokio_postgres::types::Json;
use tokio_postgres::{Client, NoTls, Row};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::model::{Chunk, SearchHit, VectorChunk};

/// Read-side contract the retrieval pipeline consumes.
///
/// Hits come back in descending relevance order per engine. Lexical hits
/// carry the full chunk record; vector hits carry the id only. The store is
/// shared across requests and must be safe under concurrent use.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Full-text search over chunk bodies, best match first.
    async fn term_search(
        &self,
        cancel: &CancellationToken,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit<Chunk>>>;

    /// Approximate nearest-neighbour search over chunk embeddings.
    async fn vector_search(
        &self,
        cancel: &CancellationToken,
        embedding: &[f32],
        k: usize,
        num_candidates: usize,
    ) -> Result<Vec<SearchHit<VectorChunk>>>;

    /// Unordered batch fetch by chunk id.
    async fn find_by_ids(&self, cancel: &CancellationToken, ids: &[String]) -> Result<Vec<Chunk>>;

    /// Distinct `source_uri` values present in the corpus.
    async fn distinct_sources(&self, cancel: &CancellationToken) -> Result<Vec<String>>;
}

/// Fully-qualified Postgres table name (schema + table).
#[derive(Debug, Clone)]
pub struct TableName {
    schema: String,
    table: String,
}

impl TableName {
    /// Builds a new table identifier.
    pub fn new<S, T>(schema: S, table: T) -> Result<Self>
    where
        S: Into<String>,
        T: Into<String>,
    {
        let schema = schema.into();
        let table = table.into();
        anyhow::ensure!(!schema.trim().is_empty(), "schema name is required");
        anyhow::ensure!(!table.trim().is_empty(), "table name is required");
        Ok(Self { schema, table })
    }

    /// Fully-qualified table reference with quoted identifiers.
    pub fn qualified(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.table))
    }
}

/// Quotes Postgres identifiers, escaping embedded quotes.
pub fn quote_ident(input: &str) -> String {
    let escaped = input.replace('"', "\"\"");
    format!("\"{escaped}\"")
}

const CHUNK_COLUMNS: &str =
    "chunk_id, section_id, window_index, prev_chunk_id, next_chunk_id, title, source_uri, sentences";

fn term_search_sql(table: &TableName) -> String {
    format!(
        "WITH query AS (SELECT plainto_tsquery('english', $1) AS q)
        SELECT
            {CHUNK_COLUMNS},
            ts_rank_cd(body_tsv, query.q) AS score
        FROM {table}
        CROSS JOIN query
        WHERE query.q <> to_tsquery('') AND body_tsv @@ query.q
        ORDER BY score DESC
        LIMIT $2",
        table = table.qualified()
    )
}

fn vector_search_sql(table: &TableName) -> String {
    format!(
        "SELECT chunk_id, embedding <=> $1 AS distance \
        FROM {} \
        ORDER BY embedding <=> $1 ASC \
        LIMIT $2",
        table.qualified()
    )
}

fn find_by_ids_sql(table: &TableName) -> String {
    format!(
        "SELECT {CHUNK_COLUMNS} FROM {} WHERE chunk_id = ANY($1)",
        table.qualified()
    )
}

fn distinct_sources_sql(table: &TableName) -> String {
    format!(
        "SELECT DISTINCT source_uri FROM {} ORDER BY source_uri",
        table.qualified()
    )
}

fn chunk_from_row(row: &Row) -> Result<Chunk> {
    let Json(sentences): Json<Vec<String>> = row.try_get("sentences")?;
    Ok(Chunk {
        chunk_id: row.try_get("chunk_id")?,
        section_id: row.try_get("section_id")?,
        window_index: row.try_get("window_index")?,
        prev_chunk_id: row.try_get("prev_chunk_id")?,
        next_chunk_id: row.try_get("next_chunk_id")?,
        title: row.try_get("title")?,
        source_uri: row.try_get("source_uri")?,
        sentences,
    })
}

/// pgvector-backed store reading a pre-populated chunk table.
///
/// The table carries one row per chunk with a generated `body_tsv` column
/// for lexical search and an `embedding VECTOR` column for dense search.
pub struct PostgresStore {
    client: Client,
    term_sql: String,
    vector_sql: String,
    find_sql: String,
    sources_sql: String,
}

impl PostgresStore {
    /// Connects to Postgres and prepares the per-table SQL.
    ///
    /// `ef_search` sizes the HNSW candidate pool for this connection; it is
    /// applied best-effort so flat-scan deployments keep working.
    pub async fn connect(database_url: &str, table: TableName, ef_search: usize) -> Result<Self> {
        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .with_context(|| format!("failed to connect to Postgres at {database_url}"))?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                error!(error = %err, "postgres connection error");
            }
        });

        let set_ef = format!("SET hnsw.ef_search = {}", ef_search.max(1));
        if let Err(err) = client.batch_execute(&set_ef).await {
            warn!(error = %err, "could not set hnsw.ef_search; continuing without it");
        }

        Ok(Self {
            term_sql: term_search_sql(&table),
            vector_sql: vector_search_sql(&table),
            find_sql: find_by_ids_sql(&table),
            sources_sql: distinct_sources_sql(&table),
            client,
        })
    }

    async fn query(
        &self,
        cancel: &CancellationToken,
        sql: &str,
        params: &[&(dyn tokio_postgres::types::ToSql + Sync)],
    ) -> Result<Vec<Row>> {
        tokio::select! {
            rows = self.client.query(sql, params) => rows.map_err(Into::into),
            _ = cancel.cancelled() => anyhow::bail!("store call cancelled"),
        }
    }
}

#[async_trait]
impl DocumentStore for PostgresStore {
    async fn term_search(
        &self,
        cancel: &CancellationToken,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit<Chunk>>> {
        let trimmed = query.trim();
        if trimmed.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let rows = self
            .query(cancel, &self.term_sql, &[&trimmed, &(limit as i64)])
            .await
            .context("lexical search query failed")?;
        let mut hits = Vec::with_capacity(rows.len());
        for row in rows {
            let score: f32 = row.try_get("score")?;
            hits.push(SearchHit {
                doc: chunk_from_row(&row)?,
                score: score as f64,
            });
        }
        Ok(hits)
    }

    async fn vector_search(
        &self,
        cancel: &CancellationToken,
        embedding: &[f32],
        k: usize,
        _num_candidates: usize,
    ) -> Result<Vec<SearchHit<VectorChunk>>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let vector = Vector::from(embedding.to_vec());
        let rows = self
            .query(cancel, &self.vector_sql, &[&vector, &(k as i64)])
            .await
            .context("vector search query failed")?;
        let mut hits = Vec::with_capacity(rows.len());
        for row in rows {
            let distance: f64 = row.try_get("distance")?;
            hits.push(SearchHit {
                doc: VectorChunk {
                    chunk_id: row.try_get("chunk_id")?,
                },
                score: distance,
            });
        }
        Ok(hits)
    }

    async fn find_by_ids(&self, cancel: &CancellationToken, ids: &[String]) -> Result<Vec<Chunk>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self
            .query(cancel, &self.find_sql, &[&ids])
            .await
            .context("batched chunk fetch failed")?;
        rows.iter().map(chunk_from_row).collect()
    }

    async fn distinct_sources(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        let rows = self
            .query(cancel, &self.sources_sql, &[])
            .await
            .context("distinct sources query failed")?;
        rows.iter()
            .map(|row| row.try_get("source_uri").map_err(Into::into))
            .collect()
    }
}
