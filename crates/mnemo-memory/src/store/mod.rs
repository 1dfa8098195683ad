//! Memory store implementation using SQLite.
//!
//! The store is the only writer of every entity kind: memories (with their
//! importance audit trail), conversation turns, session summaries, captures,
//! expanded learnings (with reinforcement events), learning paths and
//! persisted embedding vectors.
//!
//! Alongside the connection it owns the [`AssociationIndex`] and the pair-lock
//! registry. Memory mutations update the index while the connection lock is
//! still held, so no reader can observe a row and its index entry disagreeing.

mod embedding_ops;
mod learning_ops;
mod locks;
mod memory_ops;
mod turn_ops;

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::{Mutex, RwLock};
use rusqlite::{Connection, OpenFlags};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::association::AssociationIndex;
use crate::error::{MemoryError, Result};
use crate::types::{Importance, StoreStats};

pub use embedding_ops::{EmbeddingKind, StoredEmbedding};
pub use locks::{IdLockGuard, IdLocks};
pub use memory_ops::{MemoryFilter, MergeOutcome};

// ─────────────────────────────────────────────────────────────────────────────
// Schema Version
// ─────────────────────────────────────────────────────────────────────────────

/// Current schema version, stored in `PRAGMA user_version`.
const SCHEMA_VERSION: i32 = 1;

// ─────────────────────────────────────────────────────────────────────────────
// Memory Store
// ─────────────────────────────────────────────────────────────────────────────

/// Memory store backed by SQLite.
///
/// Uses WAL mode for better concurrent read performance.
pub struct MemoryStore {
    /// The SQLite connection.
    pub(crate) conn: Mutex<Connection>,
    /// Label index over live memories.
    pub(crate) associations: RwLock<AssociationIndex>,
    /// Claims held by in-flight cross-record mutations.
    pub(crate) locks: IdLocks,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("indexed_memories", &self.associations.read().len())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Initialization
// ─────────────────────────────────────────────────────────────────────────────

impl MemoryStore {
    /// Open or create a memory store at the given path.
    ///
    /// Creates the database file and initializes the schema if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|_| {
                MemoryError::StorageUnavailable(rusqlite::Error::InvalidPath(path.to_path_buf()))
            })?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        )?;

        let store = Self::from_connection(conn)?;
        info!("Memory store opened at {:?}", path);
        Ok(store)
    }

    /// Create an in-memory store (useful for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self::from_connection(conn)?;
        info!("In-memory store created");
        Ok(store)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
            associations: RwLock::new(AssociationIndex::new()),
            locks: IdLocks::new(),
        };
        store.initialize()?;
        store.rebuild_associations()?;
        Ok(store)
    }

    /// Initialize the database with schema and pragmas.
    fn initialize(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        self.create_schema(&conn)
    }

    /// Create the database schema.
    fn create_schema(&self, conn: &Connection) -> Result<()> {
        let current_version: i32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        if current_version >= SCHEMA_VERSION {
            debug!("Schema up to date (version {})", current_version);
            return Ok(());
        }

        info!(
            "Migrating schema from version {} to {}",
            current_version, SCHEMA_VERSION
        );

        conn.execute_batch(
            r#"
            -- Memories: immutable content, mutable metadata. `seq` records insertion order.
            CREATE TABLE IF NOT EXISTS memories (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                content TEXT NOT NULL,
                importance INTEGER NOT NULL,
                timestamp TEXT NOT NULL,
                created_at TEXT NOT NULL,
                topics TEXT NOT NULL DEFAULT '[]',
                people TEXT NOT NULL DEFAULT '[]',
                places TEXT NOT NULL DEFAULT '[]',
                sentiment TEXT,
                source TEXT,
                related_ids TEXT NOT NULL DEFAULT '[]',
                access_count INTEGER NOT NULL DEFAULT 0,
                last_accessed TEXT,
                superseded INTEGER NOT NULL DEFAULT 0,
                superseded_by TEXT,
                categories TEXT NOT NULL DEFAULT '[]'
            );

            CREATE INDEX IF NOT EXISTS idx_memories_timestamp
                ON memories(timestamp);

            CREATE INDEX IF NOT EXISTS idx_memories_superseded
                ON memories(superseded);

            -- Append-only importance audit trail
            CREATE TABLE IF NOT EXISTS importance_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                memory_id TEXT NOT NULL,
                old_importance INTEGER NOT NULL,
                new_importance INTEGER NOT NULL,
                reason TEXT,
                changed_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_importance_history_memory
                ON importance_history(memory_id);

            -- Conversation turns
            CREATE TABLE IF NOT EXISTS conversation_turns (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                session_id TEXT NOT NULL,
                user_message TEXT NOT NULL,
                assistant_response TEXT NOT NULL,
                topics TEXT NOT NULL DEFAULT '[]',
                importance INTEGER NOT NULL,
                sentiment TEXT,
                timestamp TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}'
            );

            CREATE INDEX IF NOT EXISTS idx_turns_session_timestamp
                ON conversation_turns(session_id, timestamp);

            -- Persisted session summaries
            CREATE TABLE IF NOT EXISTS session_summaries (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                summary TEXT NOT NULL,
                generated_at TEXT NOT NULL
            );

            -- Quick captures
            CREATE TABLE IF NOT EXISTS captures (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                content TEXT NOT NULL,
                context TEXT,
                tags TEXT NOT NULL DEFAULT '[]',
                expand_later INTEGER NOT NULL DEFAULT 1,
                expanded INTEGER NOT NULL DEFAULT 0,
                expanded_to TEXT,
                timestamp TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_captures_timestamp
                ON captures(timestamp);

            -- Expanded learnings; one per capture
            CREATE TABLE IF NOT EXISTS learnings (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                capture_id TEXT NOT NULL UNIQUE,
                expanded_content TEXT NOT NULL,
                importance INTEGER NOT NULL,
                base_importance INTEGER NOT NULL,
                topics TEXT NOT NULL DEFAULT '[]',
                related_to TEXT NOT NULL DEFAULT '[]',
                key_insight TEXT,
                reinforcement_count INTEGER NOT NULL DEFAULT 0,
                mastery_level INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                last_reinforced TEXT
            );

            -- Append-only reinforcement events
            CREATE TABLE IF NOT EXISTS reinforcements (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                learning_id TEXT NOT NULL,
                usage_context TEXT,
                reinforced_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_reinforcements_learning
                ON reinforcements(learning_id);

            -- Saved learning paths
            CREATE TABLE IF NOT EXISTS learning_paths (
                id TEXT PRIMARY KEY,
                goal TEXT NOT NULL,
                level TEXT NOT NULL,
                path TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            -- Persisted embedding vectors (little-endian f32 BLOBs)
            CREATE TABLE IF NOT EXISTS embeddings (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                provider TEXT NOT NULL,
                dimensions INTEGER NOT NULL,
                vector BLOB NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )?;

        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;

        info!("Schema created (version {})", SCHEMA_VERSION);
        Ok(())
    }

    /// Rebuild the association index from all live memories.
    pub fn rebuild_associations(&self) -> Result<()> {
        let memories = self.list_live_memories()?;
        let index = AssociationIndex::rebuild(&memories);
        let count = index.len();
        *self.associations.write() = index;
        debug!(count, "Association index rebuilt");
        Ok(())
    }

    /// Flush the WAL into the main database file.
    pub fn checkpoint(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
        debug!("WAL checkpointed");
        Ok(())
    }

    /// Pair-lock registry for cross-record mutations.
    pub fn locks(&self) -> &IdLocks {
        &self.locks
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Transactions
// ─────────────────────────────────────────────────────────────────────────────

impl MemoryStore {
    /// Execute a function within a transaction.
    ///
    /// All operations within the closure are executed atomically.
    /// If the closure returns an error, all changes are rolled back.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock();
        Self::transact(&mut conn, f)
    }

    /// Run `f` in a transaction on an already locked connection.
    pub(crate) fn transact<F, T>(conn: &mut Connection, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Utility Operations
// ─────────────────────────────────────────────────────────────────────────────

impl MemoryStore {
    /// Get database statistics.
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.conn.lock();

        let count = |sql: &str| -> Result<usize> {
            let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
            Ok(n as usize)
        };

        let schema_version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

        Ok(StoreStats {
            memory_count: count("SELECT COUNT(*) FROM memories")?,
            live_memory_count: count("SELECT COUNT(*) FROM memories WHERE superseded = 0")?,
            turn_count: count("SELECT COUNT(*) FROM conversation_turns")?,
            session_count: count("SELECT COUNT(DISTINCT session_id) FROM conversation_turns")?,
            capture_count: count("SELECT COUNT(*) FROM captures")?,
            learning_count: count("SELECT COUNT(*) FROM learnings")?,
            path_count: count("SELECT COUNT(*) FROM learning_paths")?,
            summary_count: count("SELECT COUNT(*) FROM session_summaries")?,
            embedding_count: count("SELECT COUNT(*) FROM embeddings")?,
            schema_version,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Column codecs
// ─────────────────────────────────────────────────────────────────────────────

/// Fixed-width RFC3339 (microseconds, `Z`), so lexical order is time order.
pub(crate) fn ts(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| MemoryError::InvalidData(format!("bad timestamp '{}': {}", s, e)))
}

pub(crate) fn parse_opt_ts(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_ts).transpose()
}

/// Round to the stored precision so values read back compare equal.
pub(crate) fn truncate_micros(t: DateTime<Utc>) -> DateTime<Utc> {
    let nanos = t.timestamp_subsec_nanos();
    t - chrono::Duration::nanoseconds(i64::from(nanos % 1_000))
}

pub(crate) fn decode_importance(value: i64) -> Result<Importance> {
    Importance::new(value)
        .map_err(|_| MemoryError::InvalidData(format!("stored importance {} out of range", value)))
}

pub(crate) fn to_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

pub(crate) fn from_json<T: DeserializeOwned>(s: &str) -> Result<T> {
    Ok(serde_json::from_str(s)?)
}
