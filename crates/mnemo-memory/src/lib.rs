//! Persistent memory for AI agents.
//!
//! The crate stores memories, conversation turns and incremental learnings in
//! a single SQLite file and keeps a semantic index beside it so records can be
//! found by meaning as well as by time, topic and the other association
//! dimensions.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  MemoryEngine                                                           │
//! │  - validation, recall, reflection, learning, consolidation              │
//! │  - best-effort semantic indexing (DegradedIndexWarning on failure)      │
//! ├────────────────────────────────┬────────────────────────────────────────┤
//! │  MemoryStore                   │  SemanticEngine (mnemo-embed)          │
//! │  - SQLite, WAL mode            │  - Embedder + in-memory vector index   │
//! │  - association index           │                                        │
//! │  - per-id mutation locks       │                                        │
//! └────────────────────────────────┴────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use mnemo_embed::MockEmbedder;
//! use mnemo_memory::{EngineSettings, MemoryEngine, NewMemory, RecallQuery};
//!
//! # async fn run() -> mnemo_memory::Result<()> {
//! let engine = MemoryEngine::open(
//!     "memory.db",
//!     Arc::new(MockEmbedder::new(384)),
//!     EngineSettings::default(),
//! )?;
//!
//! let stored = engine
//!     .store_memory(NewMemory::new("Learned about Rust ownership").with_topics(["rust"]))
//!     .await?;
//! println!("stored {}", stored.value.id);
//!
//! let today = engine.recall_by_time(RecallQuery::new("today"))?;
//! println!("{} memories today", today.memories.len());
//! # Ok(())
//! # }
//! ```

pub mod association;
pub mod engine;
pub mod error;
pub mod store;
pub mod time_range;
pub mod types;
pub mod validation;

pub use association::{AssociationIndex, AssociationQuery};
pub use engine::{
    AccessStats, Aspect, CaptureRequest, ConsolidationReport, DayActivity, DegradedIndexWarning,
    EngineSettings, FrequencyStats, HistoryQuery, ImportanceStats, MemoryEngine, MergedPair,
    OrganizedMemory, PathRequest, ProgressReport, RecallQuery, RecallResult, ReflectionReport,
    SentimentStats, SkippedPair, StaleLearning, TimelineStats, TurnSearch, WithWarnings,
    reinforcement_bonus,
};
pub use error::{MemoryError, Result};
pub use store::{EmbeddingKind, MemoryFilter, MemoryStore, MergeOutcome};
pub use time_range::{Period, TimeRange, resolve_period};
pub use types::{
    CaptureId, ConversationTurn, DEFAULT_SESSION, ExpandRequest, ExpandedLearning, Importance,
    ImportanceChange, ImportanceUpdate, IncrementalCapture, LearningId, LearningPath, Memory,
    MemoryId, Milestone, NewMemory, NewTurn, PathId, Reinforcement, Sentiment, SessionSummary,
    SkillLevel, StoreStats, SummaryId, TopicCount, TurnHighlight, TurnId, TurnMatch,
};
