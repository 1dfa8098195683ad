//! Entity types owned by the memory store.
//!
//! Every record kind has its own typed id. Ids are UUIDv7 (time ordered)
//! rendered with a kind prefix, e.g. `mem_0192f1c4-...`, so an id string tells
//! you what it points at and ids never collide across kinds.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::error::{MemoryError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// ID Types
// ─────────────────────────────────────────────────────────────────────────────

macro_rules! prefixed_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(Uuid);

        impl $name {
            /// Prefix used in the string form.
            pub const PREFIX: &'static str = $prefix;

            /// Create a new time-ordered id.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Create from an existing UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the underlying UUID.
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// Parse the prefixed string form.
            pub fn parse(s: &str) -> Result<Self> {
                let trimmed = s.trim();
                let raw = trimmed.strip_prefix($prefix).ok_or_else(|| {
                    MemoryError::validation("id", format!("'{}' is not a {}… id", s, $prefix))
                })?;
                Uuid::parse_str(raw)
                    .map(Self)
                    .map_err(|e| MemoryError::validation("id", format!("'{}': {}", s, e)))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}{}", $prefix, self.0)
            }
        }

        impl FromStr for $name {
            type Err = MemoryError;

            fn from_str(s: &str) -> Result<Self> {
                Self::parse(s)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::parse(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

prefixed_id!(
    /// Identifier of a [`Memory`].
    MemoryId,
    "mem_"
);
prefixed_id!(
    /// Identifier of a [`ConversationTurn`].
    TurnId,
    "turn_"
);
prefixed_id!(
    /// Identifier of an [`IncrementalCapture`].
    CaptureId,
    "cap_"
);
prefixed_id!(
    /// Identifier of an [`ExpandedLearning`].
    LearningId,
    "learn_"
);
prefixed_id!(
    /// Identifier of a persisted [`LearningPath`].
    PathId,
    "path_"
);
prefixed_id!(
    /// Identifier of a persisted [`SessionSummary`].
    SummaryId,
    "sum_"
);

// ─────────────────────────────────────────────────────────────────────────────
// Importance
// ─────────────────────────────────────────────────────────────────────────────

/// Importance on a 1–10 scale. Out-of-range values are rejected, never clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct Importance(u8);

impl Importance {
    /// Lowest accepted value.
    pub const MIN: u8 = 1;
    /// Highest accepted value.
    pub const MAX: u8 = 10;
    /// Value used when the caller gives none.
    pub const DEFAULT: Importance = Importance(5);
    /// Memories at or above this count as high importance in reflection.
    pub const HIGH: u8 = 8;

    /// Validate a raw value.
    pub fn new(value: i64) -> Result<Self> {
        if (Self::MIN as i64..=Self::MAX as i64).contains(&value) {
            Ok(Self(value as u8))
        } else {
            Err(MemoryError::validation(
                "importance",
                format!(
                    "must be between {} and {}, got {}",
                    Self::MIN,
                    Self::MAX,
                    value
                ),
            ))
        }
    }

    /// The raw value.
    pub fn get(self) -> u8 {
        self.0
    }

    /// Add `bonus`, capping at [`Importance::MAX`].
    pub fn saturating_add(self, bonus: u8) -> Self {
        Self(self.0.saturating_add(bonus).min(Self::MAX))
    }
}

impl Default for Importance {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<i64> for Importance {
    type Error = MemoryError;

    fn try_from(value: i64) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Importance> for u8 {
    fn from(value: Importance) -> Self {
        value.0
    }
}

impl fmt::Display for Importance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sentiment
// ─────────────────────────────────────────────────────────────────────────────

/// Affective label attached to a memory or turn.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
    /// Any other caller-supplied label, lowercased.
    Other(String),
}

impl Sentiment {
    /// Parse a label. Blank input yields `None`.
    pub fn parse(s: &str) -> Option<Self> {
        let label = s.trim().to_lowercase();
        match label.as_str() {
            "" => None,
            "positive" => Some(Self::Positive),
            "neutral" => Some(Self::Neutral),
            "negative" => Some(Self::Negative),
            _ => Some(Self::Other(label)),
        }
    }

    /// Label as stored.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Positive => "positive",
            Self::Neutral => "neutral",
            Self::Negative => "negative",
            Self::Other(label) => label,
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Sentiment {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Sentiment {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).ok_or_else(|| serde::de::Error::custom("empty sentiment label"))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tag Sets
// ─────────────────────────────────────────────────────────────────────────────

/// Ordered set of labels (topics, people, places, tags, categories).
pub type TagSet = BTreeSet<String>;

/// Build a [`TagSet`]: trims every value and drops blanks.
pub fn tag_set<I, S>(values: I) -> TagSet
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    values
        .into_iter()
        .map(|v| v.as_ref().trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

/// Case-insensitive "any of `wanted` is in `have`".
pub fn tags_intersect(have: &TagSet, wanted: &TagSet) -> bool {
    wanted.iter().any(|w| {
        let w = w.to_lowercase();
        have.iter().any(|h| h.to_lowercase() == w)
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Memory
// ─────────────────────────────────────────────────────────────────────────────

/// A discrete unit of knowledge. Content is immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub id: MemoryId,
    pub content: String,
    pub importance: Importance,
    /// When the remembered event happened. Set once.
    pub timestamp: DateTime<Utc>,
    /// When the record was written.
    pub created_at: DateTime<Utc>,
    pub topics: TagSet,
    pub people: TagSet,
    pub places: TagSet,
    pub sentiment: Option<Sentiment>,
    /// Provenance tag.
    pub source: Option<String>,
    /// Non-owning edges to other memories. Never contains `id`.
    pub related_ids: BTreeSet<MemoryId>,
    /// Labels added by organize.
    pub categories: TagSet,
    pub access_count: u32,
    pub last_accessed: Option<DateTime<Utc>>,
    pub superseded: bool,
    pub superseded_by: Option<MemoryId>,
}

impl Memory {
    /// Whether the memory still takes part in recall.
    pub fn is_live(&self) -> bool {
        !self.superseded
    }

    /// Merge precedence: higher importance, then older timestamp, then smaller id.
    pub fn outranks(&self, other: &Memory) -> bool {
        self.importance
            .cmp(&other.importance)
            .then_with(|| other.timestamp.cmp(&self.timestamp))
            .then_with(|| other.id.cmp(&self.id))
            .is_gt()
    }
}

/// Input for `store_memory`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NewMemory {
    pub content: String,
    pub importance: Option<i64>,
    pub timestamp: Option<DateTime<Utc>>,
    pub topics: Vec<String>,
    pub people: Vec<String>,
    pub places: Vec<String>,
    pub sentiment: Option<String>,
    pub source: Option<String>,
    /// Raw memory id strings to link.
    pub related_to: Vec<String>,
}

impl NewMemory {
    /// Start a new memory with the given content.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_importance(mut self, importance: i64) -> Self {
        self.importance = Some(importance);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_topics<I: IntoIterator<Item = S>, S: Into<String>>(mut self, topics: I) -> Self {
        self.topics.extend(topics.into_iter().map(Into::into));
        self
    }

    pub fn with_people<I: IntoIterator<Item = S>, S: Into<String>>(mut self, people: I) -> Self {
        self.people.extend(people.into_iter().map(Into::into));
        self
    }

    pub fn with_places<I: IntoIterator<Item = S>, S: Into<String>>(mut self, places: I) -> Self {
        self.places.extend(places.into_iter().map(Into::into));
        self
    }

    pub fn with_sentiment(mut self, sentiment: impl Into<String>) -> Self {
        self.sentiment = Some(sentiment.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_related(mut self, id: impl ToString) -> Self {
        self.related_to.push(id.to_string());
        self
    }
}

/// One row of the importance audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportanceChange {
    pub memory_id: MemoryId,
    pub old: Importance,
    pub new: Importance,
    pub reason: Option<String>,
    pub changed_at: DateTime<Utc>,
}

/// Result of `update_memory_importance`.
#[derive(Debug, Clone, Serialize)]
pub struct ImportanceUpdate {
    pub old: Importance,
    pub new: Importance,
    pub memory: Memory,
}

// ─────────────────────────────────────────────────────────────────────────────
// Conversation
// ─────────────────────────────────────────────────────────────────────────────

/// Session used when a turn names none.
pub const DEFAULT_SESSION: &str = "default";

/// One user/assistant exchange. Never mutated after it is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub id: TurnId,
    pub session_id: String,
    pub user_message: String,
    pub assistant_response: String,
    pub topics: TagSet,
    pub importance: Importance,
    pub sentiment: Option<Sentiment>,
    pub timestamp: DateTime<Utc>,
    /// Caller-defined extra fields, kept opaque.
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl ConversationTurn {
    /// Text submitted to the semantic engine.
    pub fn indexed_text(&self) -> String {
        format!(
            "User: {}\n\nAssistant: {}",
            self.user_message, self.assistant_response
        )
    }
}

/// Input for `store_conversation_turn`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NewTurn {
    pub session_id: Option<String>,
    pub user_message: String,
    pub assistant_response: String,
    pub topics: Vec<String>,
    pub importance: Option<i64>,
    pub sentiment: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl NewTurn {
    pub fn new(user_message: impl Into<String>, assistant_response: impl Into<String>) -> Self {
        Self {
            user_message: user_message.into(),
            assistant_response: assistant_response.into(),
            ..Default::default()
        }
    }

    pub fn in_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_importance(mut self, importance: i64) -> Self {
        self.importance = Some(importance);
        self
    }

    pub fn with_topics<I: IntoIterator<Item = S>, S: Into<String>>(mut self, topics: I) -> Self {
        self.topics.extend(topics.into_iter().map(Into::into));
        self
    }

    pub fn with_sentiment(mut self, sentiment: impl Into<String>) -> Self {
        self.sentiment = Some(sentiment.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// A conversation search hit.
#[derive(Debug, Clone, Serialize)]
pub struct TurnMatch {
    pub turn: ConversationTurn,
    /// Similarity score when the hit came from the semantic engine.
    pub relevance: Option<f32>,
}

/// Label/count pair used by summaries and reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicCount {
    pub topic: String,
    pub count: usize,
}

/// A high-importance turn called out by a session summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnHighlight {
    pub turn_id: TurnId,
    pub importance: Importance,
    pub excerpt: String,
    pub timestamp: DateTime<Utc>,
}

/// Derived aggregation of one session's turns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Set when the summary was persisted.
    pub id: Option<SummaryId>,
    pub session_id: String,
    pub turn_count: usize,
    pub first_turn_at: DateTime<Utc>,
    pub last_turn_at: DateTime<Utc>,
    pub duration_minutes: i64,
    pub top_topics: Vec<TopicCount>,
    /// Most frequent sentiment label, if any turn carried one.
    pub overall_sentiment: Option<String>,
    pub sentiment_distribution: BTreeMap<String, usize>,
    pub high_importance_turns: Vec<TurnHighlight>,
    pub generated_at: DateTime<Utc>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Incremental Learning
// ─────────────────────────────────────────────────────────────────────────────

/// A quickly jotted note waiting to be expanded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncrementalCapture {
    pub id: CaptureId,
    pub content: String,
    pub context: Option<String>,
    pub tags: TagSet,
    pub expand_later: bool,
    pub expanded: bool,
    pub expanded_to: Option<LearningId>,
    pub timestamp: DateTime<Utc>,
}

/// One recorded use of a learning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reinforcement {
    pub usage_context: Option<String>,
    pub reinforced_at: DateTime<Utc>,
}

/// A capture developed into full knowledge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpandedLearning {
    pub id: LearningId,
    pub capture_id: CaptureId,
    pub expanded_content: String,
    pub importance: Importance,
    /// Importance at expansion time; reinforcement bonuses are computed from it.
    pub base_importance: Importance,
    pub topics: TagSet,
    /// Raw ids of related records of any kind.
    pub related_to: BTreeSet<String>,
    pub key_insight: Option<String>,
    pub reinforcement_count: u32,
    pub mastery_level: u8,
    pub created_at: DateTime<Utc>,
    pub last_reinforced: Option<DateTime<Utc>>,
    pub reinforcements: Vec<Reinforcement>,
}

impl ExpandedLearning {
    /// Most recent use: last reinforcement, else creation.
    pub fn last_used(&self) -> DateTime<Utc> {
        self.last_reinforced.unwrap_or(self.created_at)
    }
}

/// Input for `expand_learning`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExpandRequest {
    pub expanded_content: String,
    pub importance: Option<i64>,
    pub topics: Option<Vec<String>>,
    pub related_to: Vec<String>,
    pub key_insight: Option<String>,
}

impl ExpandRequest {
    pub fn new(expanded_content: impl Into<String>) -> Self {
        Self {
            expanded_content: expanded_content.into(),
            ..Default::default()
        }
    }

    pub fn with_importance(mut self, importance: i64) -> Self {
        self.importance = Some(importance);
        self
    }

    pub fn with_topics<I: IntoIterator<Item = S>, S: Into<String>>(mut self, topics: I) -> Self {
        self.topics = Some(topics.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_key_insight(mut self, insight: impl Into<String>) -> Self {
        self.key_insight = Some(insight.into());
        self
    }

    pub fn with_related(mut self, id: impl ToString) -> Self {
        self.related_to.push(id.to_string());
        self
    }
}

/// Starting level for a learning path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillLevel {
    Beginner,
    Intermediate,
    Advanced,
}

impl SkillLevel {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "beginner" => Ok(Self::Beginner),
            "intermediate" => Ok(Self::Intermediate),
            "advanced" => Ok(Self::Advanced),
            other => Err(MemoryError::validation(
                "current_level",
                format!("unknown level '{}' (expected beginner, intermediate, advanced)", other),
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Beginner => "beginner",
            Self::Intermediate => "intermediate",
            Self::Advanced => "advanced",
        }
    }
}

/// One phase of a learning path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub phase: String,
    pub description: String,
    pub tasks: Vec<String>,
}

/// A generated learning roadmap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningPath {
    pub id: PathId,
    pub goal: String,
    pub level: SkillLevel,
    pub known_topics: TagSet,
    pub milestones: Vec<Milestone>,
    pub created_at: DateTime<Utc>,
    /// Whether the path was written to the store.
    pub saved: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Store statistics
// ─────────────────────────────────────────────────────────────────────────────

/// Row counts per record kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub memory_count: usize,
    pub live_memory_count: usize,
    pub turn_count: usize,
    pub session_count: usize,
    pub capture_count: usize,
    pub learning_count: usize,
    pub path_count: usize,
    pub summary_count: usize,
    pub embedding_count: usize,
    pub schema_version: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_roundtrip_and_prefix() {
        let id = MemoryId::new();
        let s = id.to_string();
        assert!(s.starts_with("mem_"));
        assert_eq!(MemoryId::parse(&s).unwrap(), id);
        assert!(TurnId::parse(&s).is_err());
        assert!(MemoryId::parse("mem_not-a-uuid").is_err());
    }

    #[test]
    fn test_ids_are_time_ordered() {
        let a = CaptureId::new();
        let b = CaptureId::new();
        assert!(a < b);
    }

    #[test]
    fn test_id_serde_as_string() {
        let id = LearningId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
        let back: LearningId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_importance_bounds() {
        assert!(Importance::new(0).is_err());
        assert!(Importance::new(11).is_err());
        assert!(Importance::new(-3).is_err());
        assert_eq!(Importance::new(1).unwrap().get(), 1);
        assert_eq!(Importance::new(10).unwrap().get(), 10);
        assert_eq!(Importance::default().get(), 5);

        let err = Importance::new(11).unwrap_err();
        assert!(matches!(err, MemoryError::Validation { ref field, .. } if field == "importance"));
    }

    #[test]
    fn test_importance_saturating_add() {
        let imp = Importance::new(9).unwrap();
        assert_eq!(imp.saturating_add(3).get(), 10);
        assert_eq!(Importance::new(4).unwrap().saturating_add(2).get(), 6);
    }

    #[test]
    fn test_importance_serde_rejects_out_of_range() {
        assert!(serde_json::from_str::<Importance>("7").is_ok());
        assert!(serde_json::from_str::<Importance>("0").is_err());
        assert_eq!(serde_json::to_string(&Importance::DEFAULT).unwrap(), "5");
    }

    #[test]
    fn test_sentiment_parse() {
        assert_eq!(Sentiment::parse(" Positive "), Some(Sentiment::Positive));
        assert_eq!(Sentiment::parse("NEGATIVE"), Some(Sentiment::Negative));
        assert_eq!(
            Sentiment::parse("Curious"),
            Some(Sentiment::Other("curious".to_string()))
        );
        assert_eq!(Sentiment::parse("   "), None);
    }

    #[test]
    fn test_tag_set_trims_and_dedups() {
        let tags = tag_set([" rust ", "rust", "", "  ", "async"]);
        assert_eq!(tags.len(), 2);
        assert!(tags.contains("rust"));
        assert!(tags.contains("async"));
    }

    #[test]
    fn test_tags_intersect_is_case_insensitive() {
        let have = tag_set(["Python", "data"]);
        assert!(tags_intersect(&have, &tag_set(["python"])));
        assert!(!tags_intersect(&have, &tag_set(["rust"])));
        assert!(!tags_intersect(&have, &TagSet::new()));
    }

    #[test]
    fn test_skill_level_parse() {
        assert_eq!(SkillLevel::parse("Beginner").unwrap(), SkillLevel::Beginner);
        assert!(SkillLevel::parse("guru").unwrap_err().is_validation());
    }
}
