//! Conversation turn and session summary operations.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};
use tracing::debug;

use crate::error::{MemoryError, Result};
use crate::types::{ConversationTurn, Sentiment, SessionSummary, SummaryId, TurnId};

use super::{MemoryStore, decode_importance, from_json, parse_ts, to_json, ts};

const TURN_COLUMNS: &str =
    "id, session_id, user_message, assistant_response, topics, importance, sentiment, timestamp, metadata";

impl MemoryStore {
    /// Insert a conversation turn.
    pub fn insert_turn(&self, turn: &ConversationTurn) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute(
            &format!(
                "INSERT INTO conversation_turns ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                TURN_COLUMNS
            ),
            params![
                turn.id.to_string(),
                turn.session_id,
                turn.user_message,
                turn.assistant_response,
                to_json(&turn.topics)?,
                turn.importance.get(),
                turn.sentiment.as_ref().map(Sentiment::as_str),
                ts(&turn.timestamp),
                to_json(&turn.metadata)?,
            ],
        )?;

        debug!("Inserted turn {} in session {}", turn.id, turn.session_id);
        Ok(())
    }

    /// Get a turn by ID.
    pub fn get_turn(&self, id: TurnId) -> Result<Option<ConversationTurn>> {
        let conn = self.conn.lock();

        let sql = format!("SELECT {} FROM conversation_turns WHERE id = ?1", TURN_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        stmt.query_row(params![id.to_string()], |row| Ok(Self::row_to_turn(row)))
            .optional()?
            .transpose()
    }

    /// Fetch several turns; unknown ids are skipped.
    pub fn get_turns(&self, ids: impl IntoIterator<Item = TurnId>) -> Result<Vec<ConversationTurn>> {
        let mut out = Vec::new();
        for id in ids {
            if let Some(turn) = self.get_turn(id)? {
                out.push(turn);
            }
        }
        Ok(out)
    }

    /// All turns of a session, oldest first.
    pub fn session_turns(&self, session_id: &str) -> Result<Vec<ConversationTurn>> {
        let conn = self.conn.lock();

        let sql = format!(
            "SELECT {} FROM conversation_turns WHERE session_id = ?1 ORDER BY timestamp ASC, seq ASC",
            TURN_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params![session_id])?;

        let mut turns = Vec::new();
        while let Some(row) = rows.next()? {
            turns.push(Self::row_to_turn(row)?);
        }
        Ok(turns)
    }

    /// Turns newest first, optionally restricted to a session and a lower time bound.
    pub fn recent_turns(
        &self,
        session_id: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ConversationTurn>> {
        let conn = self.conn.lock();

        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(session) = session_id {
            values.push(Box::new(session.to_string()));
            clauses.push("session_id = ?");
        }
        if let Some(since) = since {
            values.push(Box::new(ts(&since)));
            clauses.push("timestamp >= ?");
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        let sql = format!(
            "SELECT {} FROM conversation_turns {} ORDER BY timestamp DESC, seq DESC",
            TURN_COLUMNS, where_clause
        );

        let mut stmt = conn.prepare(&sql)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|b| b.as_ref()).collect();
        let mut rows = stmt.query(params_refs.as_slice())?;

        let mut turns = Vec::new();
        while let Some(row) = rows.next()? {
            turns.push(Self::row_to_turn(row)?);
        }
        Ok(turns)
    }

    /// Turns where either message contains `query` (case-insensitive).
    pub fn search_turns_lexical(&self, query: &str) -> Result<Vec<ConversationTurn>> {
        let conn = self.conn.lock();

        let sql = format!(
            r#"
            SELECT {} FROM conversation_turns
            WHERE instr(lower(user_message), lower(?1)) > 0
               OR instr(lower(assistant_response), lower(?1)) > 0
            ORDER BY timestamp DESC, seq DESC
            "#,
            TURN_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params![query.trim()])?;

        let mut turns = Vec::new();
        while let Some(row) = rows.next()? {
            turns.push(Self::row_to_turn(row)?);
        }
        Ok(turns)
    }

    /// Persist a session summary, returning its new id.
    pub fn insert_summary(&self, summary: &SessionSummary) -> Result<SummaryId> {
        let id = summary.id.unwrap_or_default();
        let stored = SessionSummary {
            id: Some(id),
            ..summary.clone()
        };

        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO session_summaries (id, session_id, summary, generated_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                id.to_string(),
                stored.session_id,
                to_json(&stored)?,
                ts(&stored.generated_at),
            ],
        )?;

        debug!("Saved summary {} for session {}", id, stored.session_id);
        Ok(id)
    }

    /// Persisted summaries of a session, newest first.
    pub fn session_summaries(&self, session_id: &str) -> Result<Vec<SessionSummary>> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare(
            "SELECT summary FROM session_summaries WHERE session_id = ?1 ORDER BY generated_at DESC",
        )?;
        let mut rows = stmt.query(params![session_id])?;

        let mut summaries = Vec::new();
        while let Some(row) = rows.next()? {
            let json: String = row.get(0)?;
            summaries.push(from_json(&json)?);
        }
        Ok(summaries)
    }

    fn row_to_turn(row: &rusqlite::Row) -> Result<ConversationTurn> {
        let id: String = row.get(0)?;
        let topics: String = row.get(4)?;
        let sentiment: Option<String> = row.get(6)?;
        let timestamp: String = row.get(7)?;
        let metadata: String = row.get(8)?;

        Ok(ConversationTurn {
            id: TurnId::parse(&id).map_err(|e| MemoryError::InvalidData(e.to_string()))?,
            session_id: row.get(1)?,
            user_message: row.get(2)?,
            assistant_response: row.get(3)?,
            topics: from_json(&topics)?,
            importance: decode_importance(row.get(5)?)?,
            sentiment: sentiment.as_deref().and_then(Sentiment::parse),
            timestamp: parse_ts(&timestamp)?,
            metadata: from_json(&metadata)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NewTurn;
    use crate::validation::validate_new_turn;
    use chrono::Duration;

    fn turn(new: NewTurn) -> ConversationTurn {
        validate_new_turn(new, Utc::now()).unwrap()
    }

    #[test]
    fn test_turn_roundtrip_keeps_metadata() {
        let store = MemoryStore::open_in_memory().unwrap();
        let t = turn(
            NewTurn::new("How do lifetimes work?", "They bound references.")
                .in_session("s1")
                .with_topics(["rust"])
                .with_metadata("model", serde_json::json!("small")),
        );
        store.insert_turn(&t).unwrap();

        let fetched = store.get_turn(t.id).unwrap().unwrap();
        assert_eq!(fetched, t);
        assert_eq!(fetched.metadata["model"], "small");
    }

    #[test]
    fn test_session_and_recent_ordering() {
        let store = MemoryStore::open_in_memory().unwrap();
        let now = Utc::now();
        let first = turn(
            NewTurn::new("a", "b")
                .in_session("s1")
                .with_timestamp(now - Duration::hours(2)),
        );
        let second = turn(NewTurn::new("c", "d").in_session("s1").with_timestamp(now));
        let other = turn(NewTurn::new("e", "f").in_session("s2").with_timestamp(now));
        for t in [&second, &first, &other] {
            store.insert_turn(t).unwrap();
        }

        let session = store.session_turns("s1").unwrap();
        assert_eq!(session.iter().map(|t| t.id).collect::<Vec<_>>(), vec![first.id, second.id]);

        let recent = store
            .recent_turns(Some("s1"), Some(now - Duration::hours(1)))
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, second.id);

        assert_eq!(store.recent_turns(None, None).unwrap().len(), 3);
    }

    #[test]
    fn test_lexical_search_matches_either_side() {
        let store = MemoryStore::open_in_memory().unwrap();
        store.insert_turn(&turn(NewTurn::new("Tell me about Tokio", "It is a runtime"))).unwrap();
        store.insert_turn(&turn(NewTurn::new("Weather?", "Sunny with TOKIO skies"))).unwrap();
        store.insert_turn(&turn(NewTurn::new("Hi", "Hello"))).unwrap();

        assert_eq!(store.search_turns_lexical("tokio").unwrap().len(), 2);
    }

    #[test]
    fn test_summary_persistence() {
        let store = MemoryStore::open_in_memory().unwrap();
        let now = Utc::now();
        let summary = SessionSummary {
            id: None,
            session_id: "s1".into(),
            turn_count: 2,
            first_turn_at: now,
            last_turn_at: now,
            duration_minutes: 0,
            top_topics: vec![],
            overall_sentiment: None,
            sentiment_distribution: Default::default(),
            high_importance_turns: vec![],
            generated_at: crate::store::truncate_micros(now),
        };

        let id = store.insert_summary(&summary).unwrap();
        let saved = store.session_summaries("s1").unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].id, Some(id));
        assert_eq!(store.stats().unwrap().summary_count, 1);
    }
}
