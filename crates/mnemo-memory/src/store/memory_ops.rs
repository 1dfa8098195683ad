//! Memory CRUD operations.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use tracing::debug;

use crate::error::{MemoryError, Result};
use crate::time_range::TimeRange;
use crate::types::{Importance, ImportanceChange, ImportanceUpdate, Memory, MemoryId, Sentiment};

use super::{MemoryStore, decode_importance, from_json, parse_opt_ts, parse_ts, to_json, ts};

const MEMORY_COLUMNS: &str = "id, content, importance, timestamp, created_at, topics, people, \
    places, sentiment, source, related_ids, categories, access_count, last_accessed, \
    superseded, superseded_by";

/// Structured filter for scanning memories.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryFilter {
    /// Restrict to `timestamp ∈ [start, end)`.
    pub range: Option<TimeRange>,
    /// Restrict to importance ≥ this.
    pub min_importance: Option<Importance>,
    /// Include superseded records.
    pub include_superseded: bool,
}

impl MemoryFilter {
    pub fn in_range(range: Option<TimeRange>) -> Self {
        Self {
            range,
            ..Default::default()
        }
    }
}

/// Both sides of a completed merge.
#[derive(Debug, Clone, Serialize)]
pub struct MergeOutcome {
    pub survivor: Memory,
    pub loser: Memory,
}

impl MemoryStore {
    /// Insert a new memory and index its labels.
    pub fn insert_memory(&self, memory: &Memory) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute(
            &format!(
                "INSERT INTO memories ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                MEMORY_COLUMNS
            ),
            params![
                memory.id.to_string(),
                memory.content,
                memory.importance.get(),
                ts(&memory.timestamp),
                ts(&memory.created_at),
                to_json(&memory.topics)?,
                to_json(&memory.people)?,
                to_json(&memory.places)?,
                memory.sentiment.as_ref().map(Sentiment::as_str),
                memory.source,
                to_json(&memory.related_ids)?,
                to_json(&memory.categories)?,
                memory.access_count,
                memory.last_accessed.as_ref().map(ts),
                memory.superseded as i32,
                memory.superseded_by.map(|id| id.to_string()),
            ],
        )?;

        self.associations.write().insert(memory);

        debug!("Inserted memory {}", memory.id);
        Ok(())
    }

    /// Get a memory by ID.
    pub fn get_memory(&self, id: MemoryId) -> Result<Option<Memory>> {
        let conn = self.conn.lock();
        Self::fetch_memory(&conn, id)
    }

    /// Get a memory by ID, failing with `NotFound`.
    pub fn require_memory(&self, id: MemoryId) -> Result<Memory> {
        self.get_memory(id)?
            .ok_or_else(|| MemoryError::not_found("memory", id))
    }

    /// Fetch several memories; unknown ids are skipped. Order follows `ids`.
    pub fn get_memories(&self, ids: impl IntoIterator<Item = MemoryId>) -> Result<Vec<Memory>> {
        let conn = self.conn.lock();
        let mut out = Vec::new();
        for id in ids {
            if let Some(memory) = Self::fetch_memory(&conn, id)? {
                out.push(memory);
            }
        }
        Ok(out)
    }

    /// Scan memories ordered by timestamp desc, importance desc, insertion order.
    pub fn query_memories(&self, filter: &MemoryFilter) -> Result<Vec<Memory>> {
        let conn = self.conn.lock();

        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if !filter.include_superseded {
            clauses.push("superseded = 0");
        }
        if let Some(range) = filter.range {
            values.push(Box::new(ts(&range.start)));
            values.push(Box::new(ts(&range.end)));
            clauses.push("timestamp >= ? AND timestamp < ?");
        }
        if let Some(min) = filter.min_importance {
            values.push(Box::new(min.get()));
            clauses.push("importance >= ?");
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        let sql = format!(
            "SELECT {} FROM memories {} ORDER BY timestamp DESC, importance DESC, seq ASC",
            MEMORY_COLUMNS, where_clause
        );

        let mut stmt = conn.prepare(&sql)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|b| b.as_ref()).collect();
        let mut rows = stmt.query(params_refs.as_slice())?;

        let mut memories = Vec::new();
        while let Some(row) = rows.next()? {
            memories.push(Self::row_to_memory(row)?);
        }

        Ok(memories)
    }

    /// All live memories.
    pub fn list_live_memories(&self) -> Result<Vec<Memory>> {
        self.query_memories(&MemoryFilter::default())
    }

    /// Live memories whose content contains `query` (case-insensitive),
    /// ranked importance desc then recency.
    pub fn search_memories_lexical(&self, query: &str, limit: usize) -> Result<Vec<Memory>> {
        let conn = self.conn.lock();

        let sql = format!(
            r#"
            SELECT {} FROM memories
            WHERE superseded = 0 AND instr(lower(content), lower(?1)) > 0
            ORDER BY importance DESC, timestamp DESC, seq ASC
            LIMIT ?2
            "#,
            MEMORY_COLUMNS
        );

        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params![query.trim(), limit as i64])?;

        let mut memories = Vec::new();
        while let Some(row) = rows.next()? {
            memories.push(Self::row_to_memory(row)?);
        }

        Ok(memories)
    }

    /// Record a recall hit on each memory (access_count + 1, last_accessed = `at`).
    pub fn touch_memories(&self, ids: &[MemoryId], at: DateTime<Utc>) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        self.with_transaction(|conn| {
            let mut stmt = conn.prepare(
                "UPDATE memories SET access_count = access_count + 1, last_accessed = ?2 WHERE id = ?1",
            )?;
            for id in ids {
                stmt.execute(params![id.to_string(), ts(&at)])?;
            }
            Ok(())
        })
    }

    /// Change a memory's importance and append the audit row atomically.
    pub fn set_importance(
        &self,
        id: MemoryId,
        new: Importance,
        reason: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<ImportanceUpdate> {
        let mut conn = self.conn.lock();

        let memory = Self::transact(&mut conn, |tx| {
            let memory = Self::fetch_memory(tx, id)?
                .ok_or_else(|| MemoryError::not_found("memory", id))?;

            tx.execute(
                "UPDATE memories SET importance = ?2 WHERE id = ?1",
                params![id.to_string(), new.get()],
            )?;
            tx.execute(
                r#"
                INSERT INTO importance_history (memory_id, old_importance, new_importance, reason, changed_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![id.to_string(), memory.importance.get(), new.get(), reason, ts(&at)],
            )?;

            Ok(memory)
        })?;

        let old = memory.importance;
        let memory = Memory {
            importance: new,
            ..memory
        };
        self.associations.write().insert(&memory);

        debug!("Memory {} importance {} -> {}", id, old, new);
        Ok(ImportanceUpdate { old, new, memory })
    }

    /// Audit trail for a memory, oldest first.
    pub fn importance_history(&self, id: MemoryId) -> Result<Vec<ImportanceChange>> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare(
            r#"
            SELECT memory_id, old_importance, new_importance, reason, changed_at
            FROM importance_history
            WHERE memory_id = ?1
            ORDER BY id ASC
            "#,
        )?;

        let mut rows = stmt.query(params![id.to_string()])?;
        let mut changes = Vec::new();
        while let Some(row) = rows.next()? {
            let memory_id: String = row.get(0)?;
            let changed_at: String = row.get(4)?;
            changes.push(ImportanceChange {
                memory_id: MemoryId::parse(&memory_id)?,
                old: decode_importance(row.get(1)?)?,
                new: decode_importance(row.get(2)?)?,
                reason: row.get(3)?,
                changed_at: parse_ts(&changed_at)?,
            });
        }

        Ok(changes)
    }

    /// Add `category` to a memory's categories.
    pub fn add_category(&self, id: MemoryId, category: &str) -> Result<Memory> {
        let conn = self.conn.lock();

        let mut memory =
            Self::fetch_memory(&conn, id)?.ok_or_else(|| MemoryError::not_found("memory", id))?;

        if memory.categories.insert(category.trim().to_string()) {
            conn.execute(
                "UPDATE memories SET categories = ?2 WHERE id = ?1",
                params![id.to_string(), to_json(&memory.categories)?],
            )?;
            debug!("Memory {} categorized as '{}'", id, category);
        }

        Ok(memory)
    }

    /// Merge two live memories.
    ///
    /// The higher-ranked one survives and gains the union of both label sets
    /// and relations; the other is marked superseded and loses its embedding.
    /// Returns `None` (and changes nothing) if either is already superseded.
    /// Callers are expected to hold claims on both ids.
    pub fn merge_memories(&self, a: MemoryId, b: MemoryId) -> Result<Option<MergeOutcome>> {
        if a == b {
            return Err(MemoryError::validation("id", "cannot merge a memory with itself"));
        }

        let mut conn = self.conn.lock();

        let outcome = Self::transact(&mut conn, |tx| {
            let first =
                Self::fetch_memory(tx, a)?.ok_or_else(|| MemoryError::not_found("memory", a))?;
            let second =
                Self::fetch_memory(tx, b)?.ok_or_else(|| MemoryError::not_found("memory", b))?;

            if !first.is_live() || !second.is_live() {
                return Ok(None);
            }

            let (mut survivor, mut loser) = if first.outranks(&second) {
                (first, second)
            } else {
                (second, first)
            };

            survivor.topics.extend(loser.topics.iter().cloned());
            survivor.people.extend(loser.people.iter().cloned());
            survivor.places.extend(loser.places.iter().cloned());
            survivor.categories.extend(loser.categories.iter().cloned());
            survivor.related_ids.extend(loser.related_ids.iter().copied());
            survivor.related_ids.remove(&survivor.id);
            survivor.related_ids.remove(&loser.id);

            tx.execute(
                r#"
                UPDATE memories
                SET topics = ?2, people = ?3, places = ?4, categories = ?5, related_ids = ?6
                WHERE id = ?1
                "#,
                params![
                    survivor.id.to_string(),
                    to_json(&survivor.topics)?,
                    to_json(&survivor.people)?,
                    to_json(&survivor.places)?,
                    to_json(&survivor.categories)?,
                    to_json(&survivor.related_ids)?,
                ],
            )?;

            tx.execute(
                "UPDATE memories SET superseded = 1, superseded_by = ?2 WHERE id = ?1",
                params![loser.id.to_string(), survivor.id.to_string()],
            )?;
            tx.execute(
                "DELETE FROM embeddings WHERE id = ?1",
                params![loser.id.to_string()],
            )?;

            loser.superseded = true;
            loser.superseded_by = Some(survivor.id);

            Ok(Some(MergeOutcome { survivor, loser }))
        })?;

        if let Some(ref merged) = outcome {
            let mut index = self.associations.write();
            index.insert(&merged.survivor);
            index.remove(merged.loser.id);
            debug!("Merged memory {} into {}", merged.loser.id, merged.survivor.id);
        }

        Ok(outcome)
    }

    /// Physically delete a memory with its audit trail and embedding.
    pub fn delete_memory(&self, id: MemoryId) -> Result<bool> {
        let mut conn = self.conn.lock();

        let deleted = Self::transact(&mut conn, |tx| {
            let key = id.to_string();
            let rows = tx.execute("DELETE FROM memories WHERE id = ?1", params![key])?;
            tx.execute(
                "DELETE FROM importance_history WHERE memory_id = ?1",
                params![key],
            )?;
            tx.execute("DELETE FROM embeddings WHERE id = ?1", params![key])?;
            Ok(rows > 0)
        })?;

        if deleted {
            self.associations.write().remove(id);
            debug!("Deleted memory {}", id);
        }

        Ok(deleted)
    }

    /// Ids of live memories tagged with `topic`.
    pub fn memory_ids_with_topic(&self, topic: &str) -> Vec<MemoryId> {
        self.associations.read().with_topic(topic).into_iter().collect()
    }

    /// Ids of live memories matching an association query.
    pub fn association_candidates(
        &self,
        query: &crate::association::AssociationQuery,
    ) -> Vec<MemoryId> {
        self.associations.read().candidates(query).into_iter().collect()
    }

    pub(crate) fn fetch_memory(conn: &Connection, id: MemoryId) -> Result<Option<Memory>> {
        let sql = format!("SELECT {} FROM memories WHERE id = ?1", MEMORY_COLUMNS);
        let mut stmt = conn.prepare_cached(&sql)?;
        stmt.query_row(params![id.to_string()], |row| Ok(Self::row_to_memory(row)))
            .optional()?
            .transpose()
    }

    /// Convert a database row to a Memory.
    ///
    /// Expected column order: see `MEMORY_COLUMNS`.
    pub(crate) fn row_to_memory(row: &rusqlite::Row) -> Result<Memory> {
        let id_str: String = row.get(0)?;
        let timestamp: String = row.get(3)?;
        let created_at: String = row.get(4)?;
        let topics: String = row.get(5)?;
        let people: String = row.get(6)?;
        let places: String = row.get(7)?;
        let sentiment: Option<String> = row.get(8)?;
        let related_ids: String = row.get(10)?;
        let categories: String = row.get(11)?;
        let superseded: i32 = row.get(14)?;
        let superseded_by: Option<String> = row.get(15)?;

        Ok(Memory {
            id: MemoryId::parse(&id_str)
                .map_err(|e| MemoryError::InvalidData(e.to_string()))?,
            content: row.get(1)?,
            importance: decode_importance(row.get(2)?)?,
            timestamp: parse_ts(&timestamp)?,
            created_at: parse_ts(&created_at)?,
            topics: from_json(&topics)?,
            people: from_json(&people)?,
            places: from_json(&places)?,
            sentiment: sentiment.as_deref().and_then(Sentiment::parse),
            source: row.get(9)?,
            related_ids: from_json(&related_ids)?,
            categories: from_json(&categories)?,
            access_count: row.get(12)?,
            last_accessed: parse_opt_ts(row.get(13)?)?,
            superseded: superseded != 0,
            superseded_by: superseded_by
                .as_deref()
                .map(MemoryId::parse)
                .transpose()
                .map_err(|e| MemoryError::InvalidData(e.to_string()))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::association::AssociationQuery;
    use crate::types::NewMemory;
    use crate::validation::validate_new_memory;
    use chrono::Duration;

    fn create_test_store() -> MemoryStore {
        MemoryStore::open_in_memory().unwrap()
    }

    fn new_memory(new: NewMemory) -> Memory {
        validate_new_memory(new, Utc::now()).unwrap()
    }

    #[test]
    fn test_memory_crud() {
        let store = create_test_store();

        let memory = new_memory(
            NewMemory::new("Learned about lifetimes")
                .with_importance(7)
                .with_topics(["rust"])
                .with_people(["Ferris"])
                .with_sentiment("positive")
                .with_source("book"),
        );
        store.insert_memory(&memory).unwrap();

        let fetched = store.get_memory(memory.id).unwrap().unwrap();
        assert_eq!(fetched, memory);

        assert!(store.delete_memory(memory.id).unwrap());
        assert!(store.get_memory(memory.id).unwrap().is_none());
        assert!(!store.delete_memory(memory.id).unwrap());
        assert!(matches!(
            store.require_memory(memory.id),
            Err(MemoryError::NotFound { kind: "memory", .. })
        ));
    }

    #[test]
    fn test_query_order_and_filters() {
        let store = create_test_store();
        let now = Utc::now();

        let old = new_memory(NewMemory::new("old").with_timestamp(now - Duration::days(3)));
        let low = new_memory(NewMemory::new("low").with_importance(2).with_timestamp(now));
        let high = new_memory(NewMemory::new("high").with_importance(9).with_timestamp(now));
        for m in [&old, &low, &high] {
            store.insert_memory(m).unwrap();
        }

        let all = store.list_live_memories().unwrap();
        let contents: Vec<_> = all.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["high", "low", "old"]);

        let filter = MemoryFilter {
            range: Some(TimeRange::new(now - Duration::days(1), now + Duration::days(1))),
            min_importance: Some(Importance::new(5).unwrap()),
            include_superseded: false,
        };
        let hits = store.query_memories(&filter).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "high");
    }

    #[test]
    fn test_set_importance_writes_audit_row() {
        let store = create_test_store();
        let memory = new_memory(NewMemory::new("x"));
        store.insert_memory(&memory).unwrap();

        let update = store
            .set_importance(memory.id, Importance::new(9).unwrap(), Some("core"), Utc::now())
            .unwrap();
        assert_eq!(update.old.get(), 5);
        assert_eq!(update.new.get(), 9);
        assert_eq!(update.memory.importance.get(), 9);

        let history = store.importance_history(memory.id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].reason.as_deref(), Some("core"));

        let missing = store.set_importance(MemoryId::new(), Importance::DEFAULT, None, Utc::now());
        assert!(matches!(missing, Err(MemoryError::NotFound { .. })));
    }

    #[test]
    fn test_touch_increments_access_count() {
        let store = create_test_store();
        let memory = new_memory(NewMemory::new("x"));
        store.insert_memory(&memory).unwrap();

        store.touch_memories(&[memory.id], Utc::now()).unwrap();
        store.touch_memories(&[memory.id], Utc::now()).unwrap();

        let fetched = store.require_memory(memory.id).unwrap();
        assert_eq!(fetched.access_count, 2);
        assert!(fetched.last_accessed.is_some());
    }

    #[test]
    fn test_lexical_search() {
        let store = create_test_store();
        store.insert_memory(&new_memory(NewMemory::new("Python decorators"))).unwrap();
        store.insert_memory(&new_memory(NewMemory::new("Gardening"))).unwrap();

        let hits = store.search_memories_lexical("python", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "Python decorators");
    }

    #[test]
    fn test_merge_memories() {
        let store = create_test_store();
        let other = new_memory(NewMemory::new("unrelated"));
        store.insert_memory(&other).unwrap();

        let a = new_memory(
            NewMemory::new("Learned X")
                .with_importance(8)
                .with_topics(["x"])
                .with_people(["Ann"]),
        );
        let b = new_memory(
            NewMemory::new("Learned X")
                .with_importance(4)
                .with_topics(["x", "y"])
                .with_places(["Oslo"])
                .with_related(other.id)
                .with_related(a.id),
        );
        store.insert_memory(&a).unwrap();
        store.insert_memory(&b).unwrap();

        let outcome = store.merge_memories(b.id, a.id).unwrap().unwrap();
        assert_eq!(outcome.survivor.id, a.id);
        assert_eq!(outcome.loser.id, b.id);

        let survivor = store.require_memory(a.id).unwrap();
        assert!(survivor.topics.contains("y"));
        assert!(survivor.places.contains("Oslo"));
        assert!(survivor.people.contains("Ann"));
        assert!(survivor.related_ids.contains(&other.id));
        assert!(!survivor.related_ids.contains(&a.id));
        assert!(!survivor.related_ids.contains(&b.id));

        let loser = store.require_memory(b.id).unwrap();
        assert!(loser.superseded);
        assert_eq!(loser.superseded_by, Some(a.id));

        let ids = store.association_candidates(&AssociationQuery::new().topics(["y"]));
        assert_eq!(ids, vec![a.id]);

        // Second merge of the same pair is a no-op.
        assert!(store.merge_memories(a.id, b.id).unwrap().is_none());
    }

    #[test]
    fn test_add_category_is_idempotent() {
        let store = create_test_store();
        let memory = new_memory(NewMemory::new("x"));
        store.insert_memory(&memory).unwrap();

        store.add_category(memory.id, "work").unwrap();
        let updated = store.add_category(memory.id, "work").unwrap();
        assert_eq!(updated.categories.len(), 1);
        assert_eq!(store.require_memory(memory.id).unwrap().categories.len(), 1);
    }

    #[test]
    fn test_index_rebuilt_on_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("memory.db");
        let memory = new_memory(NewMemory::new("x").with_topics(["persisted"]));
        {
            let store = MemoryStore::open(&path).unwrap();
            store.insert_memory(&memory).unwrap();
        }
        let store = MemoryStore::open(&path).unwrap();
        assert_eq!(store.memory_ids_with_topic("PERSISTED"), vec![memory.id]);
    }
}
