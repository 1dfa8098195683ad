//! Pair-lock registry.
//!
//! Cross-record mutations (consolidation merges) claim every id they touch
//! before reading them. Claims are taken in ascending id order, never block,
//! and are released when the guard drops. Contention is reported as
//! [`MemoryError::Conflict`].

use std::collections::BTreeSet;

use parking_lot::Mutex;

use crate::error::{MemoryError, Result};

/// Set of ids currently claimed.
#[derive(Debug, Default)]
pub struct IdLocks {
    held: Mutex<BTreeSet<String>>,
}

impl IdLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim all `ids` at once, or none of them.
    pub fn claim<I, S>(&self, ids: I) -> Result<IdLockGuard<'_>>
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        let wanted: BTreeSet<String> = ids.into_iter().map(|id| id.to_string()).collect();

        let mut held = self.held.lock();
        if let Some(busy) = wanted.iter().find(|id| held.contains(*id)) {
            return Err(MemoryError::Conflict(format!(
                "{} is being modified by another operation",
                busy
            )));
        }
        held.extend(wanted.iter().cloned());

        Ok(IdLockGuard {
            locks: self,
            ids: wanted,
        })
    }

    /// Whether `id` is currently claimed.
    pub fn is_held(&self, id: &str) -> bool {
        self.held.lock().contains(id)
    }
}

/// Releases its claims on drop.
#[derive(Debug)]
pub struct IdLockGuard<'a> {
    locks: &'a IdLocks,
    ids: BTreeSet<String>,
}

impl IdLockGuard<'_> {
    /// Claimed ids, ascending.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }
}

impl Drop for IdLockGuard<'_> {
    fn drop(&mut self) {
        let mut held = self.locks.held.lock();
        for id in &self.ids {
            held.remove(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_and_release() {
        let locks = IdLocks::new();
        {
            let guard = locks.claim(["mem_b", "mem_a"]).unwrap();
            assert_eq!(guard.ids().collect::<Vec<_>>(), vec!["mem_a", "mem_b"]);
            assert!(locks.is_held("mem_a"));
        }
        assert!(!locks.is_held("mem_a"));
        assert!(!locks.is_held("mem_b"));
    }

    #[test]
    fn test_overlapping_claim_conflicts() {
        let locks = IdLocks::new();
        let _guard = locks.claim(["mem_a", "mem_b"]).unwrap();
        let err = locks.claim(["mem_b", "mem_c"]).unwrap_err();
        assert!(matches!(err, MemoryError::Conflict(_)));
        // All-or-nothing: mem_c was not left claimed.
        assert!(!locks.is_held("mem_c"));
        assert!(locks.claim(["mem_c"]).is_ok());
    }
}
