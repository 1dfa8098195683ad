//! Persisted embedding vectors.
//!
//! Vectors are stored as little-endian f32 BLOBs keyed by the owning record's
//! id, tagged with the record kind and the provider that produced them. Rows
//! from another provider or dimensionality are treated as stale and skipped
//! at load time.

use std::fmt;

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;

use super::{MemoryStore, ts};

/// Which record kind a vector belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingKind {
    Memory,
    Turn,
    Capture,
    Learning,
}

impl EmbeddingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Turn => "turn",
            Self::Capture => "capture",
            Self::Learning => "learning",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "memory" => Some(Self::Memory),
            "turn" => Some(Self::Turn),
            "capture" => Some(Self::Capture),
            "learning" => Some(Self::Learning),
            _ => None,
        }
    }
}

impl fmt::Display for EmbeddingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A vector loaded back from the store.
#[derive(Debug, Clone)]
pub struct StoredEmbedding {
    pub id: String,
    pub kind: EmbeddingKind,
    pub vector: Vec<f32>,
}

impl MemoryStore {
    /// Insert or replace the vector for `id`.
    pub fn store_embedding(
        &self,
        id: &str,
        kind: EmbeddingKind,
        provider: &str,
        vector: &[f32],
        at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute(
            r#"
            INSERT OR REPLACE INTO embeddings (id, kind, provider, dimensions, vector, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                id,
                kind.as_str(),
                provider,
                vector.len() as i64,
                embedding_to_bytes(vector),
                ts(&at),
            ],
        )?;

        debug!("Stored {} embedding for {}", kind, id);
        Ok(())
    }

    /// Store a memory vector only while the memory is still live.
    ///
    /// The check and the write share the connection lock, so a merge or a
    /// delete that lands while the vector was being computed wins. Returns
    /// whether the row was written.
    pub fn store_live_memory_embedding(
        &self,
        id: &str,
        provider: &str,
        vector: &[f32],
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.conn.lock();

        let rows = conn.execute(
            r#"
            INSERT OR REPLACE INTO embeddings (id, kind, provider, dimensions, vector, updated_at)
            SELECT ?1, ?2, ?3, ?4, ?5, ?6
            WHERE EXISTS (SELECT 1 FROM memories WHERE id = ?1 AND superseded = 0)
            "#,
            params![
                id,
                EmbeddingKind::Memory.as_str(),
                provider,
                vector.len() as i64,
                embedding_to_bytes(vector),
                ts(&at),
            ],
        )?;

        if rows == 0 {
            debug!("Skipped embedding for {}; memory is no longer live", id);
        }
        Ok(rows > 0)
    }

    /// Vector for `id` if one was produced by `provider` with `dimensions`.
    pub fn get_embedding(
        &self,
        id: &str,
        provider: &str,
        dimensions: usize,
    ) -> Result<Option<Vec<f32>>> {
        let conn = self.conn.lock();

        let blob: Option<Vec<u8>> = conn
            .query_row(
                "SELECT vector FROM embeddings WHERE id = ?1 AND provider = ?2 AND dimensions = ?3",
                params![id, provider, dimensions as i64],
                |row| row.get(0),
            )
            .optional()?;

        Ok(blob.map(|b| bytes_to_embedding(&b)))
    }

    /// All vectors produced by `provider` with `dimensions`.
    pub fn load_embeddings(&self, provider: &str, dimensions: usize) -> Result<Vec<StoredEmbedding>> {
        let conn = self.conn.lock();

        let stale: i64 = conn.query_row(
            "SELECT COUNT(*) FROM embeddings WHERE provider != ?1 OR dimensions != ?2",
            params![provider, dimensions as i64],
            |row| row.get(0),
        )?;
        if stale > 0 {
            warn!(
                stale,
                provider, dimensions, "Ignoring embeddings from a different provider or dimensionality"
            );
        }

        let mut stmt = conn.prepare(
            "SELECT id, kind, vector FROM embeddings WHERE provider = ?1 AND dimensions = ?2",
        )?;
        let mut rows = stmt.query(params![provider, dimensions as i64])?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let id: String = row.get(0)?;
            let kind: String = row.get(1)?;
            let blob: Vec<u8> = row.get(2)?;
            match EmbeddingKind::parse(&kind) {
                Some(kind) => out.push(StoredEmbedding {
                    id,
                    kind,
                    vector: bytes_to_embedding(&blob),
                }),
                None => warn!("Skipping embedding {} with unknown kind '{}'", id, kind),
            }
        }
        Ok(out)
    }

    /// Remove the vector for `id`. Returns whether a row existed.
    pub fn delete_embedding(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn.execute("DELETE FROM embeddings WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Embedding serialisation helpers
// ─────────────────────────────────────────────────────────────────────────────

fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
