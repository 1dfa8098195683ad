//! Consolidation (near-duplicate merging) and organization (categorizing).

use std::collections::{HashMap, HashSet};

use mnemo_embed::{IdFilter, cosine_similarity};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{MemoryError, Result};
use crate::types::{Memory, MemoryId};
use crate::validation::{resolve_limit, validate_text, validate_threshold};

use super::{DegradedIndexWarning, MemoryEngine, WithWarnings};

/// One completed merge.
#[derive(Debug, Clone, Serialize)]
pub struct MergedPair {
    pub survivor: MemoryId,
    pub merged: MemoryId,
    pub similarity: f32,
}

/// A pair that qualified for merging but was left alone.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedPair {
    pub first: MemoryId,
    pub second: MemoryId,
    pub reason: String,
}

/// Result of [`MemoryEngine::consolidate_knowledge`].
#[derive(Debug, Clone, Serialize)]
pub struct ConsolidationReport {
    pub topic: String,
    pub threshold: f32,
    pub candidates: usize,
    pub comparisons: usize,
    pub merged: Vec<MergedPair>,
    pub skipped: Vec<SkippedPair>,
    /// Whether similarity fell back to exact content comparison.
    pub exact_match_only: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<DegradedIndexWarning>,
}

/// A memory tagged by [`MemoryEngine::organize_knowledge`].
#[derive(Debug, Clone, Serialize)]
pub struct OrganizedMemory {
    pub memory: Memory,
    /// Similarity score when matched semantically.
    pub relevance: Option<f32>,
}

impl MemoryEngine {
    /// Merge near-duplicate live memories tagged with `topic`.
    ///
    /// Candidates are compared pairwise in ranking order; each pair at or
    /// above the threshold merges into the higher-ranked memory. A pair whose
    /// ids are held by another mutation is recorded as skipped.
    pub async fn consolidate_knowledge(
        &self,
        topic: &str,
        similarity_threshold: Option<f32>,
        limit: Option<usize>,
    ) -> Result<ConsolidationReport> {
        validate_text("topic", topic)?;
        let threshold = validate_threshold(
            similarity_threshold.unwrap_or(self.settings().consolidation_threshold),
        )?;
        let limit = resolve_limit(limit, self.settings().consolidation_limit)?;

        let mut candidates: Vec<Memory> = self
            .store()
            .get_memories(self.store().memory_ids_with_topic(topic))?
            .into_iter()
            .filter(Memory::is_live)
            .collect();
        candidates.sort_by(|a, b| {
            b.importance
                .cmp(&a.importance)
                .then_with(|| b.timestamp.cmp(&a.timestamp))
                .then_with(|| a.id.cmp(&b.id))
        });
        candidates.truncate(limit);

        let mut warnings = Vec::new();
        let vectors = match self.candidate_vectors(&candidates).await {
            Ok(vectors) => Some(vectors),
            Err(warning) => {
                warnings.push(warning);
                None
            }
        };

        let mut report = ConsolidationReport {
            topic: topic.trim().to_string(),
            threshold,
            candidates: candidates.len(),
            comparisons: 0,
            merged: Vec::new(),
            skipped: Vec::new(),
            exact_match_only: vectors.is_none(),
            warnings,
        };

        let mut gone: HashSet<MemoryId> = HashSet::new();
        for (i, first) in candidates.iter().enumerate() {
            for second in &candidates[i + 1..] {
                if gone.contains(&first.id) || gone.contains(&second.id) {
                    continue;
                }

                let similarity = match &vectors {
                    Some(vectors) => match (vectors.get(&first.id), vectors.get(&second.id)) {
                        (Some(a), Some(b)) => cosine_similarity(a, b),
                        _ => 0.0,
                    },
                    None => exact_similarity(&first.content, &second.content),
                };
                report.comparisons += 1;

                if similarity < threshold {
                    continue;
                }

                match self.merge_pair(first.id, second.id) {
                    Ok(Some((survivor, loser))) => {
                        gone.insert(loser);
                        report.merged.push(MergedPair {
                            survivor,
                            merged: loser,
                            similarity,
                        });
                    }
                    Ok(None) => report.skipped.push(SkippedPair {
                        first: first.id,
                        second: second.id,
                        reason: "already superseded".to_string(),
                    }),
                    Err(MemoryError::Conflict(reason)) => report.skipped.push(SkippedPair {
                        first: first.id,
                        second: second.id,
                        reason,
                    }),
                    Err(e) => return Err(e),
                }
            }
        }

        info!(
            topic = %report.topic,
            candidates = report.candidates,
            merged = report.merged.len(),
            skipped = report.skipped.len(),
            "Consolidation finished"
        );
        Ok(report)
    }

    /// Claim both ids, merge, and drop the loser's vector.
    fn merge_pair(&self, a: MemoryId, b: MemoryId) -> Result<Option<(MemoryId, MemoryId)>> {
        let _guard = self.store().locks().claim([a, b])?;

        let Some(outcome) = self.store().merge_memories(a, b)? else {
            return Ok(None);
        };
        self.semantic().remove(&outcome.loser.id.to_string());

        debug!(survivor = %outcome.survivor.id, loser = %outcome.loser.id, "Merged");
        Ok(Some((outcome.survivor.id, outcome.loser.id)))
    }

    /// Vectors for every candidate, embedding missing ones on demand.
    async fn candidate_vectors(
        &self,
        candidates: &[Memory],
    ) -> std::result::Result<HashMap<MemoryId, Vec<f32>>, DegradedIndexWarning> {
        let semantic = self.semantic();
        let mut vectors = HashMap::with_capacity(candidates.len());

        for memory in candidates {
            let key = memory.id.to_string();
            if let Some(v) = semantic.vector(&key) {
                vectors.insert(memory.id, v);
                continue;
            }

            let stored = self
                .store()
                .get_embedding(&key, semantic.embedder_name(), semantic.dimensions())
                .map_err(|e| self.degraded("consolidate_knowledge", e))?;
            if let Some(v) = stored {
                // Ignore a rejected upsert; the vector is still usable for comparison.
                let _ = semantic.index_vector(&key, v.clone());
                vectors.insert(memory.id, v);
                continue;
            }

            let v = semantic
                .index_text(&key, &memory.content)
                .await
                .map_err(|e| self.degraded("consolidate_knowledge", e))?;
            self.store()
                .store_live_memory_embedding(&key, semantic.embedder_name(), &v, self.now())
                .map_err(|e| self.degraded("consolidate_knowledge", e))?;
            vectors.insert(memory.id, v);
        }

        Ok(vectors)
    }

    /// Tag memories matching `query` with `category`. Never merges or deletes.
    pub async fn organize_knowledge(
        &self,
        query: &str,
        category: &str,
        limit: Option<usize>,
    ) -> Result<WithWarnings<Vec<OrganizedMemory>>> {
        validate_text("query", query)?;
        validate_text("category", category)?;
        let limit = resolve_limit(limit, self.settings().organize_limit)?;

        let mut warnings = Vec::new();
        let is_memory = |id: &str| id.starts_with(MemoryId::PREFIX);
        let filter: IdFilter<'_> = &is_memory;

        let matches: Vec<(MemoryId, Option<f32>)> =
            match self.semantic().search_text(query, limit, Some(filter)).await {
                Ok(hits) => hits
                    .into_iter()
                    .filter(|h| h.score >= self.settings().min_relevance)
                    .filter_map(|h| MemoryId::parse(&h.id).ok().map(|id| (id, Some(h.score))))
                    .collect(),
                Err(e) => {
                    warnings.push(self.degraded("organize_knowledge", e));
                    self.store()
                        .search_memories_lexical(query, limit)?
                        .into_iter()
                        .map(|m| (m.id, None))
                        .collect()
                }
            };

        let mut organized = Vec::new();
        for (id, relevance) in matches {
            let Some(memory) = self.store().get_memory(id)? else {
                continue;
            };
            if !memory.is_live() {
                continue;
            }
            let memory = self.store().add_category(id, category)?;
            organized.push(OrganizedMemory { memory, relevance });
        }

        info!(
            category = category.trim(),
            count = organized.len(),
            "Knowledge organized"
        );
        Ok(WithWarnings::new(organized, warnings))
    }
}

/// 1.0 when contents match after case and whitespace normalization, else 0.0.
fn exact_similarity(a: &str, b: &str) -> f32 {
    if normalize(a) == normalize(b) { 1.0 } else { 0.0 }
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}
