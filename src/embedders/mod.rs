//! Embedding backends abstraction
//!
//! Provides a unified trait for turning source text into vectors:
//! - seeded feature hashing (deterministic, no model download)

pub mod seeded;
pub mod traits;

pub use seeded::SeededEmbedder;
pub use traits::{measure_sync, Embedder};
