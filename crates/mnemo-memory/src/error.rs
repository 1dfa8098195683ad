//! Error types for the memory crate.

use thiserror::Error;

use crate::types::CaptureId;

/// Errors that can occur in the memory crate.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Malformed or out-of-range input.
    #[error("invalid {field}: {message}")]
    Validation {
        /// Offending input field.
        field: String,
        /// What was wrong with it.
        message: String,
    },

    /// An association query named no dimension to match on.
    #[error("association query needs at least one of: topics, people, places, sentiment")]
    UnderspecifiedQuery,

    /// A time period token could not be resolved.
    #[error(
        "invalid time period '{0}' (expected today, yesterday, last_week, last_month, last_year, YYYY-MM-DD:YYYY-MM-DD or RFC3339/RFC3339)"
    )]
    InvalidPeriod(String),

    /// Requested record does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Record kind ("memory", "capture", ...).
        kind: &'static str,
        /// Id as supplied.
        id: String,
    },

    /// The capture was expanded before.
    #[error("capture {0} has already been expanded")]
    AlreadyExpanded(CaptureId),

    /// Another mutation holds one of the records involved.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Database connection or operation failed; the transaction was rolled back.
    #[error("Database error: {0}")]
    StorageUnavailable(#[from] rusqlite::Error),

    /// Serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row could not be decoded.
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl MemoryError {
    /// Build a [`MemoryError::Validation`].
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Build a [`MemoryError::NotFound`].
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Whether the caller supplied bad input (as opposed to a state or storage failure).
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. } | Self::UnderspecifiedQuery | Self::InvalidPeriod(_)
        )
    }
}

/// Result type alias for memory operations.
pub type Result<T> = std::result::Result<T, MemoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_class() {
        assert!(MemoryError::validation("importance", "out of range").is_validation());
        assert!(MemoryError::UnderspecifiedQuery.is_validation());
        assert!(MemoryError::InvalidPeriod("soon".into()).is_validation());
        assert!(!MemoryError::not_found("memory", "mem_x").is_validation());
        assert!(!MemoryError::Conflict("busy".into()).is_validation());
    }

    #[test]
    fn test_messages_name_the_field() {
        let err = MemoryError::validation("importance", "must be between 1 and 10, got 11");
        assert_eq!(
            err.to_string(),
            "invalid importance: must be between 1 and 10, got 11"
        );
        let err = MemoryError::not_found("capture", "cap_123");
        assert_eq!(err.to_string(), "capture not found: cap_123");
    }
}
