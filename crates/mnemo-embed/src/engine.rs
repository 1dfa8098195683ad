//! Timeout-bounded semantic engine.
//!
//! Couples an [`Embedder`](crate::Embedder) with a [`VectorIndex`]. Every
//! embedder call runs under `tokio::time::timeout`; callers treat any error
//! from here as a degraded-index condition rather than a hard failure.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::embeddings::SharedEmbedder;
use crate::error::{EmbedError, Result};
use crate::index::{FlatIndex, IdFilter, ScoredId, VectorIndex};

/// Embedder plus vector index, shared across tasks.
#[derive(Clone)]
pub struct SemanticEngine {
    embedder: SharedEmbedder,
    index: Arc<dyn VectorIndex>,
    timeout: Duration,
}

impl SemanticEngine {
    /// Create an engine over an explicit index.
    pub fn new(embedder: SharedEmbedder, index: Arc<dyn VectorIndex>, timeout: Duration) -> Self {
        Self {
            embedder,
            index,
            timeout,
        }
    }

    /// Create an engine backed by a fresh [`FlatIndex`] sized to the embedder.
    pub fn with_flat_index(embedder: SharedEmbedder, timeout: Duration) -> Self {
        let index = Arc::new(FlatIndex::new(embedder.dimensions()));
        Self::new(embedder, index, timeout)
    }

    /// Name of the underlying embedder.
    pub fn embedder_name(&self) -> &str {
        self.embedder.name()
    }

    /// Vector length produced by the embedder.
    pub fn dimensions(&self) -> usize {
        self.embedder.dimensions()
    }

    /// Embed `text` under the configured timeout.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        match tokio::time::timeout(self.timeout, self.embedder.embed(text)).await {
            Ok(result) => result,
            Err(_) => Err(EmbedError::Timeout(self.timeout)),
        }
    }

    /// Embed `text` and index it under `id`. Returns the vector so the caller
    /// can persist it.
    pub async fn index_text(&self, id: &str, text: &str) -> Result<Vec<f32>> {
        let vector = self.embed(text).await?;
        self.index.upsert(id, vector.clone())?;
        debug!(id, dims = vector.len(), "Indexed text");
        Ok(vector)
    }

    /// Index a precomputed vector (index warm-up).
    pub fn index_vector(&self, id: &str, vector: Vec<f32>) -> Result<()> {
        self.index.upsert(id, vector)
    }

    /// Embed `text` and return the `k` closest ids passing `filter`.
    pub async fn search_text(
        &self,
        text: &str,
        k: usize,
        filter: Option<IdFilter<'_>>,
    ) -> Result<Vec<ScoredId>> {
        let query = self.embed(text).await?;
        self.index.search(&query, k, filter)
    }

    /// Stored vector for `id`, if indexed.
    pub fn vector(&self, id: &str) -> Option<Vec<f32>> {
        self.index.get(id)
    }

    /// Drop `id` from the index.
    pub fn remove(&self, id: &str) -> bool {
        self.index.remove(id)
    }

    /// Number of indexed vectors.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether nothing is indexed.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

impl std::fmt::Debug for SemanticEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticEngine")
            .field("embedder", &self.embedder.name())
            .field("indexed", &self.index.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}
