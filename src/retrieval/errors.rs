//! Retrieval error types.

use thiserror::Error;

use crate::inference::EmbeddingError;

/// Errors from building, loading or querying a vector index.
///
/// Any of these during a rebuild leaves the cached entry untouched: the
/// cache is only written after every item has been embedded.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The embedding provider failed for one item or for the query text.
    #[error("embedding failed in collection '{collection}': {source}")]
    Embedding {
        collection: String,
        #[source]
        source: EmbeddingError,
    },

    /// The provider returned vectors of differing lengths.
    #[error("dimension mismatch in collection '{collection}': expected {expected}, got {actual}")]
    DimensionMismatch {
        collection: String,
        expected: usize,
        actual: usize,
    },

    /// The on-disk cache could not be read or written.
    #[error("index cache error: {reason}")]
    Cache { reason: String },
}

impl From<rusqlite::Error> for IndexError {
    fn from(e: rusqlite::Error) -> Self {
        IndexError::Cache {
            reason: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for IndexError {
    fn from(e: serde_json::Error) -> Self {
        IndexError::Cache {
            reason: format!("serialization error: {e}"),
        }
    }
}
