//! Input validation.
//!
//! Every write operation funnels its raw input through here before anything
//! touches the store, so a rejected request never leaves partial state.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use crate::error::{MemoryError, Result};
use crate::store::truncate_micros;
use crate::types::{
    ConversationTurn, DEFAULT_SESSION, Importance, Memory, MemoryId, NewMemory, NewTurn,
    Sentiment, TurnId, tag_set,
};

// ─────────────────────────────────────────────────────────────────────────────
// Field validators
// ─────────────────────────────────────────────────────────────────────────────

/// Reject empty or whitespace-only text.
pub fn validate_text(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(MemoryError::validation(field, "must not be empty"));
    }
    Ok(())
}

/// Validate an optional importance, falling back to `default`.
pub fn resolve_importance(value: Option<i64>, default: Importance) -> Result<Importance> {
    value.map(Importance::new).transpose().map(|v| v.unwrap_or(default))
}

/// Validate a mastery level (1–10).
pub fn validate_mastery(level: i64) -> Result<u8> {
    if (1..=10).contains(&level) {
        Ok(level as u8)
    } else {
        Err(MemoryError::validation(
            "mastery_level",
            format!("must be between 1 and 10, got {}", level),
        ))
    }
}

/// Validate a similarity threshold (0.0–1.0).
pub fn validate_threshold(value: f32) -> Result<f32> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(MemoryError::validation(
            "similarity_threshold",
            format!("must be between 0.0 and 1.0, got {}", value),
        ))
    }
}

/// Validate an explicit result limit.
pub fn resolve_limit(value: Option<usize>, default: usize) -> Result<usize> {
    match value {
        Some(0) => Err(MemoryError::validation("limit", "must be at least 1")),
        Some(n) => Ok(n),
        None => Ok(default),
    }
}

/// Parse raw ids that must all reference memories.
pub fn parse_memory_ids(values: &[String]) -> Result<BTreeSet<MemoryId>> {
    values
        .iter()
        .filter(|v| !v.trim().is_empty())
        .map(|v| {
            MemoryId::parse(v).map_err(|_| {
                MemoryError::validation("related_to", format!("'{}' is not a memory id", v))
            })
        })
        .collect()
}

/// Session id with surrounding whitespace removed; blank means the default session.
pub fn normalize_session_id(value: Option<&str>) -> String {
    match value.map(str::trim) {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => DEFAULT_SESSION.to_string(),
    }
}

/// Parse an optional sentiment label.
pub fn parse_sentiment(value: Option<&str>) -> Option<Sentiment> {
    value.and_then(Sentiment::parse)
}

// ─────────────────────────────────────────────────────────────────────────────
// Record builders
// ─────────────────────────────────────────────────────────────────────────────

/// Validate a [`NewMemory`] and build the record to insert.
pub fn validate_new_memory(input: NewMemory, now: DateTime<Utc>) -> Result<Memory> {
    let now = truncate_micros(now);
    validate_text("content", &input.content)?;
    let importance = resolve_importance(input.importance, Importance::DEFAULT)?;
    let related_ids = parse_memory_ids(&input.related_to)?;

    Ok(Memory {
        id: MemoryId::new(),
        content: input.content,
        importance,
        timestamp: truncate_micros(input.timestamp.unwrap_or(now)),
        created_at: now,
        topics: tag_set(&input.topics),
        people: tag_set(&input.people),
        places: tag_set(&input.places),
        sentiment: parse_sentiment(input.sentiment.as_deref()),
        source: input.source.filter(|s| !s.trim().is_empty()),
        related_ids,
        categories: Default::default(),
        access_count: 0,
        last_accessed: None,
        superseded: false,
        superseded_by: None,
    })
}

/// Validate a [`NewTurn`] and build the record to insert.
pub fn validate_new_turn(input: NewTurn, now: DateTime<Utc>) -> Result<ConversationTurn> {
    validate_text("user_message", &input.user_message)?;
    validate_text("assistant_response", &input.assistant_response)?;
    let importance = resolve_importance(input.importance, Importance::DEFAULT)?;

    Ok(ConversationTurn {
        id: TurnId::new(),
        session_id: normalize_session_id(input.session_id.as_deref()),
        user_message: input.user_message,
        assistant_response: input.assistant_response,
        topics: tag_set(&input.topics),
        importance,
        sentiment: parse_sentiment(input.sentiment.as_deref()),
        timestamp: truncate_micros(input.timestamp.unwrap_or(now)),
        metadata: input.metadata,
    })
}
