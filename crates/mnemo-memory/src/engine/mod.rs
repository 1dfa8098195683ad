//! The memory engine.
//!
//! [`MemoryEngine`] is the public face of the crate: it validates input, writes
//! through the [`MemoryStore`], keeps the semantic index in step and exposes
//! recall, reflection, incremental learning and consolidation. It is cheap to
//! clone and safe to share across tokio tasks.
//!
//! Semantic indexing is best effort. A write whose embedding call fails or
//! times out still commits; the caller receives the record wrapped in
//! [`WithWarnings`] together with a [`DegradedIndexWarning`].

mod consolidation;
mod conversation;
mod learning;
mod recall;
mod reflection;

use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use mnemo_embed::{SemanticEngine, SharedEmbedder};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::store::{EmbeddingKind, MemoryStore};
use crate::types::{
    Importance, ImportanceChange, ImportanceUpdate, Memory, MemoryId, NewMemory, StoreStats,
};
use crate::validation::validate_new_memory;

pub use consolidation::{ConsolidationReport, MergedPair, OrganizedMemory, SkippedPair};
pub use conversation::{HistoryQuery, TurnSearch};
pub use learning::{
    CaptureRequest, DayActivity, PathRequest, ProgressReport, StaleLearning, reinforcement_bonus,
};
pub use recall::{RecallQuery, RecallResult};
pub use reflection::{
    AccessStats, Aspect, FrequencyStats, ImportanceStats, ReflectionReport, SentimentStats,
    TimelineStats,
};

// ─────────────────────────────────────────────────────────────────────────────
// Settings
// ─────────────────────────────────────────────────────────────────────────────

/// Tunables consumed by the engine.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Result cap for recall and association queries when the caller gives none.
    pub recall_limit: usize,
    /// Result cap for conversation search.
    pub search_limit: usize,
    /// Minimum similarity for a semantic hit to count.
    pub min_relevance: f32,
    /// Importance given to expansions that do not specify one.
    pub expand_importance: Importance,
    /// A learning unused for longer than this needs reinforcement.
    pub staleness: chrono::Duration,
    pub consolidation_threshold: f32,
    pub consolidation_limit: usize,
    pub organize_limit: usize,
    /// Bound on every embedder call.
    pub embed_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            recall_limit: 20,
            search_limit: 10,
            min_relevance: 0.3,
            expand_importance: Importance::new(7).unwrap_or_default(),
            staleness: chrono::Duration::days(7),
            consolidation_threshold: 0.85,
            consolidation_limit: 20,
            organize_limit: 10,
            embed_timeout: Duration::from_millis(5000),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Degraded-mode reporting
// ─────────────────────────────────────────────────────────────────────────────

/// The semantic engine failed or timed out; the operation fell back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DegradedIndexWarning {
    pub operation: String,
    pub reason: String,
}

impl DegradedIndexWarning {
    pub fn new(operation: impl Into<String>, reason: impl ToString) -> Self {
        Self {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for DegradedIndexWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: semantic index degraded ({})", self.operation, self.reason)
    }
}

/// A successful value plus any degraded-mode warnings.
#[derive(Debug, Clone, Serialize)]
pub struct WithWarnings<T> {
    pub value: T,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<DegradedIndexWarning>,
}

impl<T> WithWarnings<T> {
    pub fn clean(value: T) -> Self {
        Self {
            value,
            warnings: Vec::new(),
        }
    }

    pub fn new(value: T, warnings: impl IntoIterator<Item = DegradedIndexWarning>) -> Self {
        Self {
            value,
            warnings: warnings.into_iter().collect(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn into_inner(self) -> T {
        self.value
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> WithWarnings<U> {
        WithWarnings {
            value: f(self.value),
            warnings: self.warnings,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────────────────────

struct EngineInner {
    store: MemoryStore,
    semantic: SemanticEngine,
    settings: EngineSettings,
}

/// Shared handle to a memory store and its semantic index.
#[derive(Clone)]
pub struct MemoryEngine {
    inner: Arc<EngineInner>,
}

impl fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryEngine")
            .field("store", &self.inner.store)
            .field("semantic", &self.inner.semantic)
            .finish_non_exhaustive()
    }
}

impl MemoryEngine {
    /// Open the store at `path` and warm the vector index from persisted embeddings.
    pub fn open(
        path: impl AsRef<Path>,
        embedder: SharedEmbedder,
        settings: EngineSettings,
    ) -> Result<Self> {
        let store = MemoryStore::open(path)?;
        Self::from_store(store, embedder, settings)
    }

    /// In-memory engine (tests, scratch sessions).
    pub fn open_in_memory(embedder: SharedEmbedder, settings: EngineSettings) -> Result<Self> {
        let store = MemoryStore::open_in_memory()?;
        Self::from_store(store, embedder, settings)
    }

    /// Wrap an already opened store.
    pub fn from_store(
        store: MemoryStore,
        embedder: SharedEmbedder,
        settings: EngineSettings,
    ) -> Result<Self> {
        let semantic = SemanticEngine::with_flat_index(embedder, settings.embed_timeout);

        let stored = store.load_embeddings(semantic.embedder_name(), semantic.dimensions())?;
        let mut warmed = 0usize;
        for embedding in stored {
            match semantic.index_vector(&embedding.id, embedding.vector) {
                Ok(()) => warmed += 1,
                Err(e) => warn!("Skipping stored vector for {}: {}", embedding.id, e),
            }
        }
        info!(
            vectors = warmed,
            embedder = semantic.embedder_name(),
            "Memory engine ready"
        );

        Ok(Self {
            inner: Arc::new(EngineInner {
                store,
                semantic,
                settings,
            }),
        })
    }

    /// Flush pending writes to the database file.
    pub fn shutdown(&self) -> Result<()> {
        self.inner.store.checkpoint()?;
        info!("Memory engine shut down");
        Ok(())
    }

    /// The underlying store.
    pub fn store(&self) -> &MemoryStore {
        &self.inner.store
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.inner.settings
    }

    pub(crate) fn semantic(&self) -> &SemanticEngine {
        &self.inner.semantic
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        crate::store::truncate_micros(Utc::now())
    }

    /// Embed `text`, index it under `id` and persist the vector.
    ///
    /// Returns a warning instead of an error on failure; the owning record
    /// is already committed by then.
    pub(crate) async fn index_record(
        &self,
        operation: &str,
        kind: EmbeddingKind,
        id: &str,
        text: &str,
    ) -> Option<DegradedIndexWarning> {
        let semantic = self.semantic();
        let vector = match semantic.index_text(id, text).await {
            Ok(v) => v,
            Err(e) => return Some(self.degraded(operation, e)),
        };

        let persisted = match kind {
            EmbeddingKind::Memory => self
                .store()
                .store_live_memory_embedding(id, semantic.embedder_name(), &vector, self.now()),
            _ => self
                .store()
                .store_embedding(id, kind, semantic.embedder_name(), &vector, self.now())
                .map(|()| true),
        };

        match persisted {
            Ok(true) => None,
            Ok(false) => {
                // Merged away or deleted while the embedder ran.
                semantic.remove(id);
                None
            }
            Err(e) => Some(self.degraded(operation, e)),
        }
    }

    pub(crate) fn degraded(&self, operation: &str, reason: impl ToString) -> DegradedIndexWarning {
        let warning = DegradedIndexWarning::new(operation, reason);
        warn!(operation, reason = %warning.reason, "Semantic index degraded");
        warning
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Memories
    // ─────────────────────────────────────────────────────────────────────────

    /// Validate and store a new memory, then index its content.
    pub async fn store_memory(&self, input: NewMemory) -> Result<WithWarnings<Memory>> {
        let memory = validate_new_memory(input, self.now())?;
        self.store().insert_memory(&memory)?;

        let warning = self
            .index_record(
                "store_memory",
                EmbeddingKind::Memory,
                &memory.id.to_string(),
                &memory.content,
            )
            .await;

        info!(id = %memory.id, importance = %memory.importance, "Memory stored");
        Ok(WithWarnings::new(memory, warning))
    }

    /// Fetch a memory by id.
    pub fn get_memory(&self, id: MemoryId) -> Result<Memory> {
        self.store().require_memory(id)
    }

    /// Set a memory's importance and record the change.
    pub fn update_memory_importance(
        &self,
        id: MemoryId,
        new_importance: i64,
        reason: Option<&str>,
    ) -> Result<ImportanceUpdate> {
        let new = Importance::new(new_importance)?;
        let reason = reason.map(str::trim).filter(|r| !r.is_empty());
        let update = self.store().set_importance(id, new, reason, self.now())?;
        info!(%id, old = %update.old, new = %update.new, "Importance updated");
        Ok(update)
    }

    /// Importance audit trail, oldest first.
    pub fn importance_history(&self, id: MemoryId) -> Result<Vec<ImportanceChange>> {
        self.store().require_memory(id)?;
        self.store().importance_history(id)
    }

    /// Physically remove a memory with its audit trail and vector.
    pub fn delete_memory(&self, id: MemoryId) -> Result<bool> {
        let deleted = self.store().delete_memory(id)?;
        if deleted {
            self.semantic().remove(&id.to_string());
            info!(%id, "Memory deleted");
        }
        Ok(deleted)
    }

    /// Memories reachable from `id` through `related_ids`, breadth first,
    /// up to `depth` hops. Excludes the start node and superseded records.
    pub fn related_memories(&self, id: MemoryId, depth: usize) -> Result<Vec<Memory>> {
        let start = self.store().require_memory(id)?;

        let mut visited: BTreeSet<MemoryId> = BTreeSet::from([id]);
        let mut queue: VecDeque<(MemoryId, usize)> = start
            .related_ids
            .iter()
            .map(|&next| (next, 1))
            .collect();
        let mut found = Vec::new();

        while let Some((current, hops)) = queue.pop_front() {
            if hops > depth || !visited.insert(current) {
                continue;
            }
            let Some(memory) = self.store().get_memory(current)? else {
                continue;
            };
            for &next in &memory.related_ids {
                if !visited.contains(&next) {
                    queue.push_back((next, hops + 1));
                }
            }
            if memory.is_live() {
                found.push(memory);
            }
        }

        debug!(%id, depth, count = found.len(), "Related memories traversed");
        Ok(found)
    }

    /// Row counts per record kind.
    pub fn stats(&self) -> Result<StoreStats> {
        self.store().stats()
    }
}
