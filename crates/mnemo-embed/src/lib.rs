//! Embedding and similarity search for mnemo.
//!
//! - [`Embedder`]: text → vector, with mock and OpenAI-compatible providers
//! - [`VectorIndex`] / [`FlatIndex`]: keyed cosine similarity search
//! - [`SemanticEngine`]: both of the above behind a per-call timeout

pub mod embeddings;
pub mod engine;
pub mod error;
pub mod index;

pub use embeddings::{
    Embedder, EmbedderSpec, MockEmbedder, OpenAiEmbedder, OpenAiEmbedderConfig, SharedEmbedder,
    build_embedder, cosine_similarity,
};
pub use engine::SemanticEngine;
pub use error::{EmbedError, Result};
pub use index::{FlatIndex, IdFilter, ScoredId, VectorIndex};
