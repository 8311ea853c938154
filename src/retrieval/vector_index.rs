//! Flat L2 nearest-neighbour index with a durable cache.
//!
//! Each item is embedded once per rebuild. The built matrix and the item
//! list are cached under a collection name, and reused only while the item
//! list is unchanged (same ids and texts in the same order).

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::cache::{CachedIndex, IndexCache};
use super::errors::IndexError;
use crate::inference::{EmbeddingError, EmbeddingProvider};

/// One indexed entry: a stable id and the text that gets embedded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexItem {
    pub id: String,
    pub text: String,
}

impl IndexItem {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// Order-sensitive digest of an item list.
///
/// Fields are length-prefixed so that `("ab", "c")` and `("a", "bc")` differ.
pub fn fingerprint(items: &[IndexItem]) -> String {
    let mut hasher = Sha256::new();
    hasher.update((items.len() as u64).to_le_bytes());
    for item in items {
        for field in [&item.id, &item.text] {
            hasher.update((field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
    }
    format!("{:x}", hasher.finalize())
}

/// An in-memory flat index over one collection.
pub struct VectorIndex {
    collection: String,
    items: Vec<IndexItem>,
    dimension: usize,
    vectors: Vec<f32>,
    fingerprint: String,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("collection", &self.collection)
            .field("items", &self.items.len())
            .field("dimension", &self.dimension)
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

impl VectorIndex {
    /// Embed every item (one provider call each) and build the index.
    /// Does not touch any cache.
    pub async fn build(
        collection: &str,
        items: Vec<IndexItem>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self, IndexError> {
        let mut dimension = 0;
        let mut vectors = Vec::new();

        for item in &items {
            let vector = embed_checked(embedder.as_ref(), collection, &item.text).await?;
            if dimension == 0 {
                dimension = vector.len();
            } else if vector.len() != dimension {
                return Err(IndexError::DimensionMismatch {
                    collection: collection.to_string(),
                    expected: dimension,
                    actual: vector.len(),
                });
            }
            vectors.extend(vector);
        }

        Ok(Self {
            collection: collection.to_string(),
            fingerprint: fingerprint(&items),
            items,
            dimension,
            vectors,
            embedder,
        })
    }

    /// Load the collection from `cache` if its stored item list matches
    /// `items`, otherwise rebuild and overwrite the cache entry.
    ///
    /// A failed rebuild leaves the previous cache entry in place.
    pub async fn open(
        collection: &str,
        items: Vec<IndexItem>,
        embedder: Arc<dyn EmbeddingProvider>,
        cache: &IndexCache,
    ) -> Result<Self, IndexError> {
        let current = fingerprint(&items);

        if let Some(cached) = cache.load(collection)? {
            if cached.fingerprint == current && cached.items == items {
                tracing::debug!(collection, items = items.len(), "vector index loaded from cache");
                return Ok(Self {
                    collection: collection.to_string(),
                    items,
                    dimension: cached.dimension,
                    vectors: cached.vectors,
                    fingerprint: current,
                    embedder,
                });
            }
            tracing::info!(collection, "cached vector index is stale, rebuilding");
        }

        let index = Self::build(collection, items, embedder).await?;
        if !index.items.is_empty() {
            let snapshot = CachedIndex {
                fingerprint: index.fingerprint.clone(),
                items: index.items.clone(),
                dimension: index.dimension,
                vectors: index.vectors.clone(),
                built_at: Utc::now(),
            };
            if let Err(e) = cache.store(collection, &snapshot) {
                tracing::warn!(collection, error = %e, "failed to persist vector index");
            }
        }
        tracing::info!(
            collection,
            items = index.items.len(),
            dimension = index.dimension,
            "vector index built"
        );
        Ok(index)
    }

    /// Ids of the `k` nearest items to `query`, nearest first.
    ///
    /// Equal distances keep item order. Returns empty without embedding the
    /// query when the index is empty or `k` is zero.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<String>, IndexError> {
        if self.items.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let q = embed_checked(self.embedder.as_ref(), &self.collection, query).await?;
        if q.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                collection: self.collection.clone(),
                expected: self.dimension,
                actual: q.len(),
            });
        }

        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(i, row)| (i, squared_l2(&q, row)))
            .collect();
        scored.sort_by(|a, b| a.1.total_cmp(&b.1));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(i, _)| self.items[i].id.clone())
            .collect())
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn items(&self) -> &[IndexItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

async fn embed_checked(
    embedder: &dyn EmbeddingProvider,
    collection: &str,
    text: &str,
) -> Result<Vec<f32>, IndexError> {
    let vector = embedder
        .embed(text)
        .await
        .map_err(|source| IndexError::Embedding {
            collection: collection.to_string(),
            source,
        })?;
    if vector.is_empty() {
        return Err(IndexError::Embedding {
            collection: collection.to_string(),
            source: EmbeddingError::UnexpectedFormat {
                reason: "zero-length vector".into(),
            },
        });
    }
    Ok(vector)
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
