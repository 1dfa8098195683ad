//! Capture, learning, reinforcement and learning-path operations.

use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use crate::error::{MemoryError, Result};
use crate::time_range::TimeRange;
use crate::types::{
    CaptureId, ExpandedLearning, IncrementalCapture, LearningId, LearningPath, PathId,
    Reinforcement,
};

use super::{MemoryStore, decode_importance, from_json, parse_opt_ts, parse_ts, to_json, ts};

const CAPTURE_COLUMNS: &str =
    "id, content, context, tags, expand_later, expanded, expanded_to, timestamp";

const LEARNING_COLUMNS: &str = "id, capture_id, expanded_content, importance, base_importance, \
    topics, related_to, key_insight, reinforcement_count, mastery_level, created_at, last_reinforced";

// ─────────────────────────────────────────────────────────────────────────────
// Captures
// ─────────────────────────────────────────────────────────────────────────────

impl MemoryStore {
    /// Insert a capture.
    pub fn insert_capture(&self, capture: &IncrementalCapture) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute(
            &format!(
                "INSERT INTO captures ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                CAPTURE_COLUMNS
            ),
            params![
                capture.id.to_string(),
                capture.content,
                capture.context,
                to_json(&capture.tags)?,
                capture.expand_later as i32,
                capture.expanded as i32,
                capture.expanded_to.map(|id| id.to_string()),
                ts(&capture.timestamp),
            ],
        )?;

        debug!("Inserted capture {}", capture.id);
        Ok(())
    }

    /// Get a capture by ID.
    pub fn get_capture(&self, id: CaptureId) -> Result<Option<IncrementalCapture>> {
        let conn = self.conn.lock();
        Self::fetch_capture(&conn, id)
    }

    /// Captures oldest first, optionally restricted to a window.
    pub fn list_captures(&self, range: Option<TimeRange>) -> Result<Vec<IncrementalCapture>> {
        let conn = self.conn.lock();

        let (sql, bounds) = match range {
            Some(r) => (
                format!(
                    "SELECT {} FROM captures WHERE timestamp >= ?1 AND timestamp < ?2 ORDER BY timestamp ASC, seq ASC",
                    CAPTURE_COLUMNS
                ),
                vec![ts(&r.start), ts(&r.end)],
            ),
            None => (
                format!(
                    "SELECT {} FROM captures ORDER BY timestamp ASC, seq ASC",
                    CAPTURE_COLUMNS
                ),
                vec![],
            ),
        };

        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(bounds.iter()))?;

        let mut captures = Vec::new();
        while let Some(row) = rows.next()? {
            captures.push(Self::row_to_capture(row)?);
        }
        Ok(captures)
    }

    /// Mark the capture expanded and insert its learning, atomically.
    ///
    /// The capture flag is flipped with a conditional update, so of two
    /// concurrent expansions of the same capture exactly one succeeds; the
    /// other gets [`MemoryError::AlreadyExpanded`] and writes nothing.
    pub fn expand_capture(&self, learning: &ExpandedLearning) -> Result<()> {
        let mut conn = self.conn.lock();

        Self::transact(&mut conn, |tx| {
            let updated = tx.execute(
                "UPDATE captures SET expanded = 1, expanded_to = ?2 WHERE id = ?1 AND expanded = 0",
                params![learning.capture_id.to_string(), learning.id.to_string()],
            )?;

            if updated == 0 {
                return Err(match Self::fetch_capture(tx, learning.capture_id)? {
                    Some(_) => MemoryError::AlreadyExpanded(learning.capture_id),
                    None => MemoryError::not_found("capture", learning.capture_id),
                });
            }

            tx.execute(
                &format!(
                    "INSERT INTO learnings ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                    LEARNING_COLUMNS
                ),
                params![
                    learning.id.to_string(),
                    learning.capture_id.to_string(),
                    learning.expanded_content,
                    learning.importance.get(),
                    learning.base_importance.get(),
                    to_json(&learning.topics)?,
                    to_json(&learning.related_to)?,
                    learning.key_insight,
                    learning.reinforcement_count,
                    learning.mastery_level,
                    ts(&learning.created_at),
                    learning.last_reinforced.as_ref().map(ts),
                ],
            )?;

            Ok(())
        })?;

        debug!(
            "Capture {} expanded into learning {}",
            learning.capture_id, learning.id
        );
        Ok(())
    }

    fn fetch_capture(conn: &Connection, id: CaptureId) -> Result<Option<IncrementalCapture>> {
        let sql = format!("SELECT {} FROM captures WHERE id = ?1", CAPTURE_COLUMNS);
        let mut stmt = conn.prepare_cached(&sql)?;
        stmt.query_row(params![id.to_string()], |row| Ok(Self::row_to_capture(row)))
            .optional()?
            .transpose()
    }

    fn row_to_capture(row: &rusqlite::Row) -> Result<IncrementalCapture> {
        let id: String = row.get(0)?;
        let tags: String = row.get(3)?;
        let expand_later: i32 = row.get(4)?;
        let expanded: i32 = row.get(5)?;
        let expanded_to: Option<String> = row.get(6)?;
        let timestamp: String = row.get(7)?;

        Ok(IncrementalCapture {
            id: CaptureId::parse(&id).map_err(|e| MemoryError::InvalidData(e.to_string()))?,
            content: row.get(1)?,
            context: row.get(2)?,
            tags: from_json(&tags)?,
            expand_later: expand_later != 0,
            expanded: expanded != 0,
            expanded_to: expanded_to
                .as_deref()
                .map(LearningId::parse)
                .transpose()
                .map_err(|e| MemoryError::InvalidData(e.to_string()))?,
            timestamp: parse_ts(&timestamp)?,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Learnings
// ─────────────────────────────────────────────────────────────────────────────

impl MemoryStore {
    /// Get a learning with its reinforcement events.
    pub fn get_learning(&self, id: LearningId) -> Result<Option<ExpandedLearning>> {
        let conn = self.conn.lock();
        Self::fetch_learning(&conn, id)
    }

    /// Learnings oldest first, optionally restricted to those created in a window.
    pub fn list_learnings(&self, range: Option<TimeRange>) -> Result<Vec<ExpandedLearning>> {
        let conn = self.conn.lock();

        let (sql, bounds) = match range {
            Some(r) => (
                format!(
                    "SELECT {} FROM learnings WHERE created_at >= ?1 AND created_at < ?2 ORDER BY created_at ASC, seq ASC",
                    LEARNING_COLUMNS
                ),
                vec![ts(&r.start), ts(&r.end)],
            ),
            None => (
                format!(
                    "SELECT {} FROM learnings ORDER BY created_at ASC, seq ASC",
                    LEARNING_COLUMNS
                ),
                vec![],
            ),
        };

        let mut learnings = {
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(rusqlite::params_from_iter(bounds.iter()))?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(Self::row_to_learning(row)?);
            }
            out
        };

        for learning in &mut learnings {
            learning.reinforcements = Self::fetch_reinforcements(&conn, learning.id)?;
        }
        Ok(learnings)
    }

    /// Apply one reinforcement inside a transaction.
    ///
    /// `apply` receives the current learning, mutates its counters and
    /// returns the event to append. Nothing is written if it fails.
    pub fn reinforce<F>(&self, id: LearningId, apply: F) -> Result<ExpandedLearning>
    where
        F: FnOnce(&mut ExpandedLearning) -> Result<Reinforcement>,
    {
        let mut conn = self.conn.lock();

        let learning = Self::transact(&mut conn, |tx| {
            let mut learning = Self::fetch_learning(tx, id)?
                .ok_or_else(|| MemoryError::not_found("learning", id))?;

            let event = apply(&mut learning)?;

            tx.execute(
                r#"
                UPDATE learnings
                SET importance = ?2, reinforcement_count = ?3, mastery_level = ?4, last_reinforced = ?5
                WHERE id = ?1
                "#,
                params![
                    id.to_string(),
                    learning.importance.get(),
                    learning.reinforcement_count,
                    learning.mastery_level,
                    learning.last_reinforced.as_ref().map(ts),
                ],
            )?;
            tx.execute(
                "INSERT INTO reinforcements (learning_id, usage_context, reinforced_at) VALUES (?1, ?2, ?3)",
                params![id.to_string(), event.usage_context, ts(&event.reinforced_at)],
            )?;

            learning.reinforcements.push(event);
            Ok(learning)
        })?;

        debug!(
            "Learning {} reinforced (count {}, importance {})",
            id, learning.reinforcement_count, learning.importance
        );
        Ok(learning)
    }

    fn fetch_learning(conn: &Connection, id: LearningId) -> Result<Option<ExpandedLearning>> {
        let sql = format!("SELECT {} FROM learnings WHERE id = ?1", LEARNING_COLUMNS);
        let learning = {
            let mut stmt = conn.prepare_cached(&sql)?;
            stmt.query_row(params![id.to_string()], |row| Ok(Self::row_to_learning(row)))
                .optional()?
                .transpose()?
        };

        match learning {
            Some(mut learning) => {
                learning.reinforcements = Self::fetch_reinforcements(conn, id)?;
                Ok(Some(learning))
            }
            None => Ok(None),
        }
    }

    fn fetch_reinforcements(conn: &Connection, id: LearningId) -> Result<Vec<Reinforcement>> {
        let mut stmt = conn.prepare_cached(
            "SELECT usage_context, reinforced_at FROM reinforcements WHERE learning_id = ?1 ORDER BY id ASC",
        )?;
        let mut rows = stmt.query(params![id.to_string()])?;

        let mut events = Vec::new();
        while let Some(row) = rows.next()? {
            let reinforced_at: String = row.get(1)?;
            events.push(Reinforcement {
                usage_context: row.get(0)?,
                reinforced_at: parse_ts(&reinforced_at)?,
            });
        }
        Ok(events)
    }

    fn row_to_learning(row: &rusqlite::Row) -> Result<ExpandedLearning> {
        let id: String = row.get(0)?;
        let capture_id: String = row.get(1)?;
        let topics: String = row.get(5)?;
        let related_to: String = row.get(6)?;
        let created_at: String = row.get(10)?;

        Ok(ExpandedLearning {
            id: LearningId::parse(&id).map_err(|e| MemoryError::InvalidData(e.to_string()))?,
            capture_id: CaptureId::parse(&capture_id)
                .map_err(|e| MemoryError::InvalidData(e.to_string()))?,
            expanded_content: row.get(2)?,
            importance: decode_importance(row.get(3)?)?,
            base_importance: decode_importance(row.get(4)?)?,
            topics: from_json(&topics)?,
            related_to: from_json(&related_to)?,
            key_insight: row.get(7)?,
            reinforcement_count: row.get(8)?,
            mastery_level: row.get(9)?,
            created_at: parse_ts(&created_at)?,
            last_reinforced: parse_opt_ts(row.get(11)?)?,
            reinforcements: Vec::new(),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Learning paths
// ─────────────────────────────────────────────────────────────────────────────

impl MemoryStore {
    /// Persist a learning path.
    pub fn insert_path(&self, path: &LearningPath) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute(
            r#"
            INSERT INTO learning_paths (id, goal, level, path, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                path.id.to_string(),
                path.goal,
                path.level.as_str(),
                to_json(path)?,
                ts(&path.created_at),
            ],
        )?;

        debug!("Saved learning path {}", path.id);
        Ok(())
    }

    /// Get a saved learning path.
    pub fn get_path(&self, id: PathId) -> Result<Option<LearningPath>> {
        let conn = self.conn.lock();

        let json: Option<String> = conn
            .query_row(
                "SELECT path FROM learning_paths WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        json.as_deref().map(from_json).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Importance, SkillLevel, tag_set};
    use chrono::{Duration, Utc};

    fn capture(content: &str) -> IncrementalCapture {
        IncrementalCapture {
            id: CaptureId::new(),
            content: content.to_string(),
            context: None,
            tags: tag_set(["python"]),
            expand_later: true,
            expanded: false,
            expanded_to: None,
            timestamp: crate::store::truncate_micros(Utc::now()),
        }
    }

    fn learning_for(capture: &IncrementalCapture) -> ExpandedLearning {
        let importance = Importance::new(7).unwrap();
        ExpandedLearning {
            id: LearningId::new(),
            capture_id: capture.id,
            expanded_content: "Decorators wrap functions".into(),
            importance,
            base_importance: importance,
            topics: capture.tags.clone(),
            related_to: Default::default(),
            key_insight: None,
            reinforcement_count: 0,
            mastery_level: 1,
            created_at: crate::store::truncate_micros(Utc::now()),
            last_reinforced: None,
            reinforcements: vec![],
        }
    }

    #[test]
    fn test_capture_roundtrip_and_window() {
        let store = MemoryStore::open_in_memory().unwrap();
        let c = capture("decorators");
        store.insert_capture(&c).unwrap();
        assert_eq!(store.get_capture(c.id).unwrap().unwrap(), c);

        let now = Utc::now();
        let window = TimeRange::new(now - Duration::hours(1), now + Duration::hours(1));
        assert_eq!(store.list_captures(Some(window)).unwrap().len(), 1);
        let past = TimeRange::new(now - Duration::days(3), now - Duration::days(2));
        assert!(store.list_captures(Some(past)).unwrap().is_empty());
    }

    #[test]
    fn test_expand_twice_fails_and_keeps_first() {
        let store = MemoryStore::open_in_memory().unwrap();
        let c = capture("decorators");
        store.insert_capture(&c).unwrap();

        let first = learning_for(&c);
        store.expand_capture(&first).unwrap();

        let second = learning_for(&c);
        let err = store.expand_capture(&second).unwrap_err();
        assert!(matches!(err, MemoryError::AlreadyExpanded(id) if id == c.id));

        let stored = store.get_capture(c.id).unwrap().unwrap();
        assert!(stored.expanded);
        assert_eq!(stored.expanded_to, Some(first.id));
        assert!(store.get_learning(second.id).unwrap().is_none());
        assert_eq!(store.list_learnings(None).unwrap().len(), 1);
    }

    #[test]
    fn test_expand_unknown_capture() {
        let store = MemoryStore::open_in_memory().unwrap();
        let orphan = learning_for(&capture("x"));
        let err = store.expand_capture(&orphan).unwrap_err();
        assert!(matches!(err, MemoryError::NotFound { kind: "capture", .. }));
    }

    #[test]
    fn test_reinforce_appends_event() {
        let store = MemoryStore::open_in_memory().unwrap();
        let c = capture("x");
        store.insert_capture(&c).unwrap();
        let l = learning_for(&c);
        store.expand_capture(&l).unwrap();

        let now = crate::store::truncate_micros(Utc::now());
        let updated = store
            .reinforce(l.id, |learning| {
                learning.reinforcement_count += 1;
                learning.last_reinforced = Some(now);
                Ok(Reinforcement {
                    usage_context: Some("used at work".into()),
                    reinforced_at: now,
                })
            })
            .unwrap();
        assert_eq!(updated.reinforcement_count, 1);

        let fetched = store.get_learning(l.id).unwrap().unwrap();
        assert_eq!(fetched.reinforcements.len(), 1);
        assert_eq!(fetched.last_reinforced, Some(now));
    }

    #[test]
    fn test_failed_reinforce_writes_nothing() {
        let store = MemoryStore::open_in_memory().unwrap();
        let c = capture("x");
        store.insert_capture(&c).unwrap();
        let l = learning_for(&c);
        store.expand_capture(&l).unwrap();

        let result = store.reinforce(l.id, |_| Err(MemoryError::validation("mastery_level", "bad")));
        assert!(result.is_err());
        assert!(store.get_learning(l.id).unwrap().unwrap().reinforcements.is_empty());

        let missing = store.reinforce(LearningId::new(), |_| unreachable!());
        assert!(matches!(missing, Err(MemoryError::NotFound { kind: "learning", .. })));
    }

    #[test]
    fn test_path_roundtrip() {
        let store = MemoryStore::open_in_memory().unwrap();
        let path = LearningPath {
            id: PathId::new(),
            goal: "Learn Rust".into(),
            level: SkillLevel::Beginner,
            known_topics: Default::default(),
            milestones: vec![],
            created_at: Utc::now(),
            saved: true,
        };
        store.insert_path(&path).unwrap();
        assert_eq!(store.get_path(path.id).unwrap().unwrap(), path);
        assert!(store.get_path(PathId::new()).unwrap().is_none());
    }
}
