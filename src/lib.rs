#![warn(missing_docs)]
//! Hybrid passage-retrieval core for LLM-facing search services.
//!
//! A query fans out to a lexical full-text search and an embed-then-vector
//! search, the two rank lists merge via Reciprocal Rank Fusion, surviving
//! chunks regroup into scored sections, and each section is expanded with
//! its neighbouring chunks before streaming out as attributed passages.

pub mod auth;
pub mod config;
pub mod embedder;
pub mod error;
pub mod fusion;
pub mod model;
pub mod passages;
pub mod render;
pub mod search;
pub mod sections;
pub mod store;
pub mod summarize;

pub use config::SearchControls;
pub use embedder::{Embedder, EmbeddingTask};
pub use error::SearchError;
pub use model::{Chunk, Passage, SearchHit, VectorChunk};
pub use search::SearchPipeline;
pub use store::{DocumentStore, PostgresStore, TableName};
pub use summarize::Summarizer;
