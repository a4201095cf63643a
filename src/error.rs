//! Error taxonomy for the retrieval pipeline.

use thiserror::Error;

/// Failures surfaced by the search pipeline and its collaborators.
///
/// The pipeline degrades rather than fails: engine and fetch errors are
/// logged and absorbed, and an error event reaches the output stream only
/// when no retrieval signal survived at all.
#[derive(Debug, Error)]
pub enum SearchError {
    /// The query was missing or empty.
    #[error("query must not be empty")]
    InputInvalid,

    /// The embedding provider failed to produce a query vector.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// One retrieval engine failed; its rank map is treated as empty.
    #[error("{engine} search failed: {message}")]
    Engine {
        /// Which engine failed (`"lexical"` or `"vector"`).
        engine: &'static str,
        /// Underlying failure description.
        message: String,
    },

    /// A batched chunk fetch failed; cached chunks are still used.
    #[error("chunk fetch failed: {0}")]
    StoreFetch(String),

    /// No retrieval signal survived; the stream carries this single event.
    #[error("retrieval failed: {0}")]
    NoSignal(String),

    /// The request was cancelled; the stream closes without further output.
    #[error("request cancelled")]
    Cancelled,
}

/// Convenience result alias for pipeline operations.
pub type Result<T> = std::result::Result<T, SearchError>;
