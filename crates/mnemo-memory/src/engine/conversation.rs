//! Conversation turns: storage, search, history and session summaries.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{MemoryError, Result};
use crate::store::EmbeddingKind;
use crate::types::{
    ConversationTurn, Importance, NewTurn, SessionSummary, TopicCount, TurnHighlight, TurnId,
    TurnMatch, tag_set, tags_intersect,
};
use crate::validation::{resolve_limit, validate_new_turn, validate_text};

use super::{MemoryEngine, WithWarnings};

/// Turns at or above this importance are highlighted in summaries.
const HIGHLIGHT_IMPORTANCE: u8 = 7;
const MAX_HIGHLIGHTS: usize = 5;
const MAX_SUMMARY_TOPICS: usize = 10;
const EXCERPT_CHARS: usize = 160;

/// Input for [`MemoryEngine::search_conversations`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TurnSearch {
    pub query: String,
    pub session_id: Option<String>,
    pub min_importance: Option<i64>,
    pub limit: Option<usize>,
}

impl TurnSearch {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn in_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
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

/// Input for [`MemoryEngine::recall_conversation_history`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HistoryQuery {
    pub session_id: Option<String>,
    pub topics: Vec<String>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl MemoryEngine {
    /// Validate and store a turn, then index both sides of the exchange.
    pub async fn store_conversation_turn(
        &self,
        input: NewTurn,
    ) -> Result<WithWarnings<ConversationTurn>> {
        let turn = validate_new_turn(input, self.now())?;
        self.store().insert_turn(&turn)?;

        let warning = self
            .index_record(
                "store_conversation_turn",
                EmbeddingKind::Turn,
                &turn.id.to_string(),
                &turn.indexed_text(),
            )
            .await;

        info!(id = %turn.id, session = %turn.session_id, "Conversation turn stored");
        Ok(WithWarnings::new(turn, warning))
    }

    /// Semantic plus lexical search over turns.
    ///
    /// Semantic hits below `min_relevance` are dropped. If the semantic engine
    /// is unavailable only lexical matches are returned, with a warning.
    pub async fn search_conversations(
        &self,
        search: TurnSearch,
    ) -> Result<WithWarnings<Vec<TurnMatch>>> {
        validate_text("query", &search.query)?;
        let min_importance = search.min_importance.map(Importance::new).transpose()?;
        let limit = resolve_limit(search.limit, self.settings().search_limit)?;
        let session = search
            .session_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        let mut warnings = Vec::new();
        let mut scores: HashMap<TurnId, f32> = HashMap::new();

        let is_turn = |id: &str| id.starts_with(TurnId::PREFIX);
        let filter: mnemo_embed::IdFilter<'_> = &is_turn;
        let k = limit.saturating_mul(4).max(50);
        match self.semantic().search_text(&search.query, k, Some(filter)).await {
            Ok(hits) => {
                for hit in hits {
                    if hit.score < self.settings().min_relevance {
                        continue;
                    }
                    if let Ok(id) = TurnId::parse(&hit.id) {
                        scores.insert(id, hit.score);
                    }
                }
            }
            Err(e) => warnings.push(self.degraded("search_conversations", e)),
        }

        let mut turns: HashMap<TurnId, ConversationTurn> = self
            .store()
            .get_turns(scores.keys().copied())?
            .into_iter()
            .map(|t| (t.id, t))
            .collect();
        for turn in self.store().search_turns_lexical(&search.query)? {
            turns.entry(turn.id).or_insert(turn);
        }

        let mut matches: Vec<TurnMatch> = turns
            .into_values()
            .filter(|t| session.is_none_or(|s| t.session_id == s))
            .filter(|t| min_importance.is_none_or(|min| t.importance >= min))
            .map(|turn| TurnMatch {
                relevance: scores.get(&turn.id).copied(),
                turn,
            })
            .collect();

        matches.sort_by(|a, b| {
            b.turn
                .importance
                .cmp(&a.turn.importance)
                .then_with(|| b.turn.timestamp.cmp(&a.turn.timestamp))
                .then_with(|| a.turn.id.cmp(&b.turn.id))
        });
        matches.truncate(limit);

        debug!(count = matches.len(), degraded = !warnings.is_empty(), "Conversation search");
        Ok(WithWarnings::new(matches, warnings))
    }

    /// The most recent matching turns, returned oldest first.
    pub fn recall_conversation_history(&self, query: HistoryQuery) -> Result<Vec<ConversationTurn>> {
        let limit = resolve_limit(query.limit, self.settings().recall_limit)?;
        let wanted = tag_set(&query.topics);
        let session = query
            .session_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        let mut turns: Vec<ConversationTurn> = self
            .store()
            .recent_turns(session, query.since)?
            .into_iter()
            .filter(|t| wanted.is_empty() || tags_intersect(&t.topics, &wanted))
            .take(limit)
            .collect();
        turns.reverse();

        Ok(turns)
    }

    /// Aggregate a session's turns, optionally persisting the summary.
    pub fn summarize_conversation_session(
        &self,
        session_id: &str,
        save: bool,
    ) -> Result<SessionSummary> {
        validate_text("session_id", session_id)?;
        let session_id = session_id.trim();
        let turns = self.store().session_turns(session_id)?;

        let mut summary = summarize_turns(session_id, &turns, self.now())
            .ok_or_else(|| MemoryError::not_found("session", session_id))?;

        if save {
            let id = self.store().insert_summary(&summary)?;
            summary.id = Some(id);
            info!(session = session_id, %id, "Session summary saved");
        }

        Ok(summary)
    }
}

/// Build a summary from turns sorted oldest first. `None` when there are none.
fn summarize_turns(
    session_id: &str,
    turns: &[ConversationTurn],
    now: DateTime<Utc>,
) -> Option<SessionSummary> {
    let first = turns.first()?;
    let last = turns.last()?;

    let mut topic_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut sentiment_distribution: BTreeMap<String, usize> = BTreeMap::new();
    for turn in turns {
        for topic in &turn.topics {
            *topic_counts.entry(topic.clone()).or_default() += 1;
        }
        if let Some(sentiment) = &turn.sentiment {
            *sentiment_distribution
                .entry(sentiment.as_str().to_string())
                .or_default() += 1;
        }
    }

    let top_topics = rank_counts(topic_counts, MAX_SUMMARY_TOPICS);

    let overall_sentiment = sentiment_distribution
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(label, _)| label.clone());

    let high_importance_turns = turns
        .iter()
        .filter(|t| t.importance.get() >= HIGHLIGHT_IMPORTANCE)
        .take(MAX_HIGHLIGHTS)
        .map(|t| TurnHighlight {
            turn_id: t.id,
            importance: t.importance,
            excerpt: excerpt(&t.user_message),
            timestamp: t.timestamp,
        })
        .collect();

    Some(SessionSummary {
        id: None,
        session_id: session_id.to_string(),
        turn_count: turns.len(),
        first_turn_at: first.timestamp,
        last_turn_at: last.timestamp,
        duration_minutes: (last.timestamp - first.timestamp).num_minutes(),
        top_topics,
        overall_sentiment,
        sentiment_distribution,
        high_importance_turns,
        generated_at: now,
    })
}

/// Sort label counts by count desc, ties alphabetical, and keep the top `n`.
pub(crate) fn rank_counts(counts: BTreeMap<String, usize>, n: usize) -> Vec<TopicCount> {
    let mut ranked: Vec<TopicCount> = counts
        .into_iter()
        .map(|(topic, count)| TopicCount { topic, count })
        .collect();
    // Stable sort keeps the BTreeMap's alphabetical order among ties.
    ranked.sort_by(|a, b| b.count.cmp(&a.count));
    ranked.truncate(n);
    ranked
}

fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= EXCERPT_CHARS {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(EXCERPT_CHARS).collect();
    format!("{}…", cut.trim_end())
}
