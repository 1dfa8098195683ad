//! Error types for the embedding crate.

use std::time::Duration;
use thiserror::Error;

/// Result type alias using the embedding error type.
pub type Result<T> = std::result::Result<T, EmbedError>;

/// Errors raised by embedders and vector indexes.
#[derive(Debug, Error)]
pub enum EmbedError {
    /// The provider rejected or failed the request.
    #[error("Embedding backend error: {0}")]
    Backend(String),

    /// The embedder is misconfigured (missing key, unknown provider).
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP transport failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider response could not be decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The call did not complete within the configured budget.
    #[error("Embedding call timed out after {0:?}")]
    Timeout(Duration),

    /// A vector does not match the index dimensionality.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimension.
        expected: usize,
        /// Actual dimension.
        actual: usize,
    },

    /// A vector contains NaN or infinite values.
    #[error("embedding contains {count} invalid values (NaN or Inf)")]
    InvalidValues {
        /// Number of invalid values found.
        count: usize,
    },

    /// Anything else.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EmbedError {
    /// Whether the error came from the timeout guard rather than the provider.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}
