//! Vector similarity index.
//!
//! [`VectorIndex`] is the seam between the memory engine and whatever
//! similarity engine backs it. [`FlatIndex`] is the in-process implementation:
//! an exact cosine scan over a map of id → vector, rebuilt from persisted
//! embeddings when the store opens.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::Serialize;

use crate::embeddings::cosine_similarity;
use crate::error::{EmbedError, Result};

/// A search hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredId {
    /// Id of the indexed record.
    pub id: String,
    /// Cosine similarity in [-1, 1]; higher is closer.
    pub score: f32,
}

/// Filter predicate applied to candidate ids before scoring.
pub type IdFilter<'a> = &'a (dyn Fn(&str) -> bool + Sync);

/// A keyed vector index.
pub trait VectorIndex: Send + Sync {
    /// Insert or replace the vector for `id`.
    fn upsert(&self, id: &str, vector: Vec<f32>) -> Result<()>;

    /// Remove `id`. Returns whether it was present.
    fn remove(&self, id: &str) -> bool;

    /// Fetch the stored vector for `id`.
    fn get(&self, id: &str) -> Option<Vec<f32>>;

    /// The `k` closest ids to `query`, best first, restricted to ids passing `filter`.
    fn search(&self, query: &[f32], k: usize, filter: Option<IdFilter<'_>>) -> Result<Vec<ScoredId>>;

    /// Number of indexed vectors.
    fn len(&self) -> usize;

    /// Whether the index is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exact in-memory cosine index.
#[derive(Debug)]
pub struct FlatIndex {
    dimensions: usize,
    vectors: RwLock<HashMap<String, Vec<f32>>>,
}

impl FlatIndex {
    /// Create an empty index for vectors of `dimensions` length.
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            vectors: RwLock::new(HashMap::new()),
        }
    }

    /// Vector length this index accepts.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn check(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimensions {
            return Err(EmbedError::DimensionMismatch {
                expected: self.dimensions,
                actual: vector.len(),
            });
        }
        let invalid = vector.iter().filter(|v| !v.is_finite()).count();
        if invalid > 0 {
            return Err(EmbedError::InvalidValues { count: invalid });
        }
        Ok(())
    }
}

impl VectorIndex for FlatIndex {
    fn upsert(&self, id: &str, vector: Vec<f32>) -> Result<()> {
        self.check(&vector)?;
        self.vectors.write().insert(id.to_string(), vector);
        Ok(())
    }

    fn remove(&self, id: &str) -> bool {
        self.vectors.write().remove(id).is_some()
    }

    fn get(&self, id: &str) -> Option<Vec<f32>> {
        self.vectors.read().get(id).cloned()
    }

    fn search(&self, query: &[f32], k: usize, filter: Option<IdFilter<'_>>) -> Result<Vec<ScoredId>> {
        self.check(query)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let vectors = self.vectors.read();
        let mut hits: Vec<ScoredId> = vectors
            .iter()
            .filter(|(id, _)| filter.is_none_or(|f| f(id)))
            .map(|(id, v)| ScoredId {
                id: id.clone(),
                score: cosine_similarity(query, v),
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(k);
        Ok(hits)
    }

    fn len(&self) -> usize {
        self.vectors.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_and_get() {
        let index = FlatIndex::new(3);
        index.upsert("a", vec![1.0, 0.0, 0.0]).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.get("a"), Some(vec![1.0, 0.0, 0.0]));

        index.upsert("a", vec![0.0, 1.0, 0.0]).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.get("a"), Some(vec![0.0, 1.0, 0.0]));
    }

    #[test]
    fn test_rejects_bad_vectors() {
        let index = FlatIndex::new(3);
        assert!(matches!(
            index.upsert("a", vec![1.0, 0.0]),
            Err(EmbedError::DimensionMismatch { expected: 3, actual: 2 })
        ));
        assert!(matches!(
            index.upsert("a", vec![f32::NAN, 0.0, f32::INFINITY]),
            Err(EmbedError::InvalidValues { count: 2 })
        ));
        assert!(index.is_empty());
    }

    #[test]
    fn test_search_orders_by_similarity() {
        let index = FlatIndex::new(2);
        index.upsert("same", vec![1.0, 0.0]).unwrap();
        index.upsert("close", vec![0.9, 0.1]).unwrap();
        index.upsert("far", vec![0.0, 1.0]).unwrap();

        let hits = index.search(&[1.0, 0.0], 2, None).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "same");
        assert_eq!(hits[1].id, "close");
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_search_with_filter() {
        let index = FlatIndex::new(2);
        index.upsert("mem_1", vec![1.0, 0.0]).unwrap();
        index.upsert("turn_1", vec![1.0, 0.0]).unwrap();

        let only_turns: IdFilter<'_> = &|id: &str| id.starts_with("turn_");
        let hits = index.search(&[1.0, 0.0], 10, Some(only_turns)).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "turn_1");
    }

    #[test]
    fn test_remove() {
        let index = FlatIndex::new(2);
        index.upsert("a", vec![1.0, 0.0]).unwrap();
        assert!(index.remove("a"));
        assert!(!index.remove("a"));
        assert!(index.search(&[1.0, 0.0], 5, None).unwrap().is_empty());
    }
}
