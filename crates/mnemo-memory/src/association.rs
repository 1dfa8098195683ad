//! In-memory association index.
//!
//! Secondary index from lowercased topic/person/place/sentiment labels to the
//! ids of live memories carrying them. Rebuilt from the store at open and kept
//! in step by every store mutation. Superseded memories are never indexed.

use std::collections::{BTreeSet, HashMap};

use serde::Deserialize;

use crate::types::{Memory, MemoryId, TagSet};

/// Which label dimension an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Dimension {
    Topic,
    Person,
    Place,
    Sentiment,
}

/// Multi-dimensional association query.
///
/// At least one of `topics`, `people`, `places` or `sentiment` must be set;
/// `min_importance` alone does not make a query.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AssociationQuery {
    pub topics: Vec<String>,
    pub people: Vec<String>,
    pub places: Vec<String>,
    pub sentiment: Option<String>,
    pub min_importance: Option<i64>,
    pub limit: Option<usize>,
}

impl AssociationQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn topics<I: IntoIterator<Item = S>, S: Into<String>>(mut self, topics: I) -> Self {
        self.topics.extend(topics.into_iter().map(Into::into));
        self
    }

    pub fn people<I: IntoIterator<Item = S>, S: Into<String>>(mut self, people: I) -> Self {
        self.people.extend(people.into_iter().map(Into::into));
        self
    }

    pub fn places<I: IntoIterator<Item = S>, S: Into<String>>(mut self, places: I) -> Self {
        self.places.extend(places.into_iter().map(Into::into));
        self
    }

    pub fn sentiment(mut self, sentiment: impl Into<String>) -> Self {
        self.sentiment = Some(sentiment.into());
        self
    }

    pub fn min_importance(mut self, min: i64) -> Self {
        self.min_importance = Some(min);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether any matching dimension is supplied.
    pub fn has_dimension(&self) -> bool {
        [&self.topics, &self.people, &self.places]
            .iter()
            .any(|d| d.iter().any(|v| !v.trim().is_empty()))
            || self
                .sentiment
                .as_deref()
                .is_some_and(|s| !s.trim().is_empty())
    }
}

/// Label → live memory ids.
#[derive(Debug, Default)]
pub struct AssociationIndex {
    postings: HashMap<(Dimension, String), BTreeSet<MemoryId>>,
    keys: HashMap<MemoryId, Vec<(Dimension, String)>>,
}

impl AssociationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a snapshot of stored memories.
    pub fn rebuild<'a>(memories: impl IntoIterator<Item = &'a Memory>) -> Self {
        let mut index = Self::new();
        for memory in memories {
            index.insert(memory);
        }
        index
    }

    /// Index (or re-index) a memory. Superseded memories are removed instead.
    pub fn insert(&mut self, memory: &Memory) {
        self.remove(memory.id);
        if !memory.is_live() {
            return;
        }

        let mut keys = Vec::new();
        push_keys(&mut keys, Dimension::Topic, &memory.topics);
        push_keys(&mut keys, Dimension::Person, &memory.people);
        push_keys(&mut keys, Dimension::Place, &memory.places);
        if let Some(ref sentiment) = memory.sentiment {
            keys.push((Dimension::Sentiment, sentiment.as_str().to_lowercase()));
        }

        for key in &keys {
            self.postings.entry(key.clone()).or_default().insert(memory.id);
        }
        self.keys.insert(memory.id, keys);
    }

    /// Drop a memory from the index.
    pub fn remove(&mut self, id: MemoryId) {
        if let Some(keys) = self.keys.remove(&id) {
            for key in keys {
                if let Some(ids) = self.postings.get_mut(&key) {
                    ids.remove(&id);
                    if ids.is_empty() {
                        self.postings.remove(&key);
                    }
                }
            }
        }
    }

    /// Ids matching any-of within each supplied dimension and all-of across them.
    ///
    /// Returns an empty set when the query names no dimension.
    pub fn candidates(&self, query: &AssociationQuery) -> BTreeSet<MemoryId> {
        let mut dimensions: Vec<BTreeSet<MemoryId>> = Vec::new();

        for (dim, values) in [
            (Dimension::Topic, &query.topics),
            (Dimension::Person, &query.people),
            (Dimension::Place, &query.places),
        ] {
            let wanted: Vec<&String> = values.iter().filter(|v| !v.trim().is_empty()).collect();
            if !wanted.is_empty() {
                dimensions.push(self.union(dim, wanted.into_iter().map(String::as_str)));
            }
        }

        if let Some(sentiment) = query.sentiment.as_deref().filter(|s| !s.trim().is_empty()) {
            dimensions.push(self.union(Dimension::Sentiment, [sentiment]));
        }

        let mut iter = dimensions.into_iter();
        let Some(mut result) = iter.next() else {
            return BTreeSet::new();
        };
        for set in iter {
            result.retain(|id| set.contains(id));
        }
        result
    }

    /// Live memories tagged with `topic`.
    pub fn with_topic(&self, topic: &str) -> BTreeSet<MemoryId> {
        self.union(Dimension::Topic, [topic])
    }

    /// Number of indexed memories.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Whether `id` is indexed (i.e. live).
    pub fn contains(&self, id: MemoryId) -> bool {
        self.keys.contains_key(&id)
    }

    fn union<'a>(&self, dim: Dimension, values: impl IntoIterator<Item = &'a str>) -> BTreeSet<MemoryId> {
        let mut out = BTreeSet::new();
        for value in values {
            let key = (dim, value.trim().to_lowercase());
            if let Some(ids) = self.postings.get(&key) {
                out.extend(ids.iter().copied());
            }
        }
        out
    }
}

fn push_keys(keys: &mut Vec<(Dimension, String)>, dim: Dimension, values: &TagSet) {
    for v in values {
        let key = (dim, v.to_lowercase());
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
}
