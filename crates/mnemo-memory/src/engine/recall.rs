//! Time-window and association recall.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::association::AssociationQuery;
use crate::error::{MemoryError, Result};
use crate::store::MemoryFilter;
use crate::time_range::{TimeRange, resolve_period};
use crate::types::{Importance, Memory, MemoryId, tag_set, tags_intersect};
use crate::validation::resolve_limit;

use super::MemoryEngine;

/// Input for [`MemoryEngine::recall_by_time`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RecallQuery {
    pub period: String,
    pub topics: Vec<String>,
    pub min_importance: Option<i64>,
    pub limit: Option<usize>,
}

impl RecallQuery {
    pub fn new(period: impl Into<String>) -> Self {
        Self {
            period: period.into(),
            ..Default::default()
        }
    }

    pub fn with_topics<I: IntoIterator<Item = S>, S: Into<String>>(mut self, topics: I) -> Self {
        self.topics.extend(topics.into_iter().map(Into::into));
        self
    }

    pub fn with_min_importance(mut self, min: i64) -> Self {
        self.min_importance = Some(min);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Memories in a window, most recent first.
#[derive(Debug, Clone, Serialize)]
pub struct RecallResult {
    pub period: String,
    pub range: TimeRange,
    pub memories: Vec<Memory>,
}

impl MemoryEngine {
    /// Recall live memories whose timestamp falls in `query.period`.
    ///
    /// Filters are conjunctive. Ordering is timestamp desc, importance desc,
    /// insertion order. Every returned memory counts as accessed.
    pub fn recall_by_time(&self, query: RecallQuery) -> Result<RecallResult> {
        let range = resolve_period(&query.period, self.now())?;
        let min_importance = query.min_importance.map(Importance::new).transpose()?;
        let limit = resolve_limit(query.limit, self.settings().recall_limit)?;
        let wanted = tag_set(&query.topics);

        let mut memories: Vec<Memory> = self
            .store()
            .query_memories(&MemoryFilter {
                range: Some(range),
                min_importance,
                include_superseded: false,
            })?
            .into_iter()
            .filter(|m| wanted.is_empty() || tags_intersect(&m.topics, &wanted))
            .take(limit)
            .collect();

        self.record_access(&mut memories)?;

        debug!(period = %query.period, %range, count = memories.len(), "Recall by time");
        Ok(RecallResult {
            period: query.period,
            range,
            memories,
        })
    }

    /// Memories matching labels across topics, people, places and sentiment.
    ///
    /// Any-of within a dimension, all-of across the supplied dimensions.
    /// Ranked by importance then recency.
    pub fn find_associations(&self, query: AssociationQuery) -> Result<Vec<Memory>> {
        if !query.has_dimension() {
            return Err(MemoryError::UnderspecifiedQuery);
        }
        let min_importance = query.min_importance.map(Importance::new).transpose()?;
        let limit = resolve_limit(query.limit, self.settings().recall_limit)?;

        let candidates: Vec<MemoryId> = self.store().association_candidates(&query);
        let mut memories: Vec<Memory> = self
            .store()
            .get_memories(candidates)?
            .into_iter()
            .filter(|m| m.is_live())
            .filter(|m| min_importance.is_none_or(|min| m.importance >= min))
            .collect();

        memories.sort_by(|a, b| {
            b.importance
                .cmp(&a.importance)
                .then_with(|| b.timestamp.cmp(&a.timestamp))
                .then_with(|| a.id.cmp(&b.id))
        });
        memories.truncate(limit);

        self.record_access(&mut memories)?;

        debug!(count = memories.len(), "Association query");
        Ok(memories)
    }

    /// Bump access counters in the store and on the returned copies.
    fn record_access(&self, memories: &mut [Memory]) -> Result<()> {
        let at = self.now();
        let ids: Vec<MemoryId> = memories.iter().map(|m| m.id).collect();
        self.store().touch_memories(&ids, at)?;
        for memory in memories.iter_mut() {
            memory.access_count += 1;
            memory.last_accessed = Some(at);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::super::test_support::engine;
    use super::*;
    use crate::types::NewMemory;

    #[tokio::test]
    async fn test_today_excludes_yesterday() {
        let engine = engine();
        let now = Utc::now();
        engine
            .store_memory(NewMemory::new("old").with_timestamp(now - Duration::days(2)))
            .await
            .unwrap();
        let fresh = engine
            .store_memory(NewMemory::new("fresh").with_timestamp(now))
            .await
            .unwrap()
            .value;

        let result = engine.recall_by_time(RecallQuery::new("today")).unwrap();
        assert_eq!(result.memories.len(), 1);
        assert_eq!(result.memories[0].id, fresh.id);
        assert!(result.memories.iter().all(|m| result.range.contains(m.timestamp)));
        assert_eq!(result.memories[0].access_count, 1);
        assert_eq!(engine.get_memory(fresh.id).unwrap().access_count, 1);
    }

    #[tokio::test]
    async fn test_today_ends_at_now() {
        let engine = engine();
        let now = Utc::now();
        engine
            .store_memory(NewMemory::new("scheduled").with_timestamp(now + Duration::seconds(30)))
            .await
            .unwrap();
        engine.store_memory(NewMemory::new("earlier")).await.unwrap();

        let result = engine.recall_by_time(RecallQuery::new("today")).unwrap();
        assert!(result.range.end <= Utc::now());
        assert!(result.memories.iter().all(|m| m.timestamp < result.range.end));
        assert!(!result.memories.iter().any(|m| m.content == "scheduled"));
    }

    #[tokio::test]
    async fn test_recall_ties_keep_insertion_order() {
        let engine = engine();
        let at = crate::store::truncate_micros(Utc::now() - Duration::hours(1));
        for content in ["first", "second", "third"] {
            engine
                .store_memory(NewMemory::new(content).with_timestamp(at).with_importance(5))
                .await
                .unwrap();
        }
        engine
            .store_memory(NewMemory::new("louder").with_timestamp(at).with_importance(8))
            .await
            .unwrap();

        let result = engine.recall_by_time(RecallQuery::new("last_week")).unwrap();
        let order: Vec<&str> = result.memories.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(order, vec!["louder", "first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_recall_filters_topics_and_importance() {
        let engine = engine();
        engine
            .store_memory(NewMemory::new("a").with_topics(["Python"]).with_importance(8))
            .await
            .unwrap();
        engine
            .store_memory(NewMemory::new("b").with_topics(["python"]).with_importance(3))
            .await
            .unwrap();
        engine
            .store_memory(NewMemory::new("c").with_topics(["rust"]).with_importance(9))
            .await
            .unwrap();

        let result = engine
            .recall_by_time(
                RecallQuery::new("last_week")
                    .with_topics(["python"])
                    .with_min_importance(7),
            )
            .unwrap();
        assert_eq!(result.memories.len(), 1);
        assert_eq!(result.memories[0].content, "a");
    }

    #[tokio::test]
    async fn test_recall_rejects_bad_input() {
        let engine = engine();
        assert!(matches!(
            engine.recall_by_time(RecallQuery::new("fortnight")),
            Err(MemoryError::InvalidPeriod(_))
        ));
        assert!(engine
            .recall_by_time(RecallQuery::new("today").with_limit(0))
            .unwrap_err()
            .is_validation());
    }

    #[tokio::test]
    async fn test_find_associations_requires_dimension() {
        let engine = engine();
        let err = engine
            .find_associations(AssociationQuery::new().min_importance(5))
            .unwrap_err();
        assert!(matches!(err, MemoryError::UnderspecifiedQuery));
    }

    #[tokio::test]
    async fn test_find_associations_all_of_across_dimensions() {
        let engine = engine();
        let both = engine
            .store_memory(
                NewMemory::new("met Ann in Oslo")
                    .with_people(["Ann"])
                    .with_places(["Oslo"])
                    .with_importance(4),
            )
            .await
            .unwrap()
            .value;
        engine
            .store_memory(NewMemory::new("met Ann").with_people(["Ann"]))
            .await
            .unwrap();
        let bob = engine
            .store_memory(
                NewMemory::new("met Bob in Oslo")
                    .with_people(["bob"])
                    .with_places(["oslo"])
                    .with_importance(9),
            )
            .await
            .unwrap()
            .value;

        let hits = engine
            .find_associations(AssociationQuery::new().people(["ann", "Bob"]).places(["OSLO"]))
            .unwrap();
        assert_eq!(hits.iter().map(|m| m.id).collect::<Vec<_>>(), vec![bob.id, both.id]);

        let limited = engine
            .find_associations(AssociationQuery::new().places(["oslo"]).limit(1))
            .unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].id, bob.id);
    }
}
