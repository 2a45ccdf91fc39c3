//! Embedder trait abstraction
//!
//! Defines the interface corpus generation uses to turn text into vectors.

use std::time::Duration;

/// Text to fixed-length vector
///
/// Implementations must be deterministic: the same text always yields the
/// same vector, so a corpus can be regenerated from its seed.
pub trait Embedder: Send + Sync {
    /// Human-readable name recorded in generated artifacts
    fn name(&self) -> &str;

    /// Length of every vector this embedder produces
    fn dimensions(&self) -> usize;

    /// Generate an embedding for a single text
    fn embed(&self, text: &str) -> Vec<f32>;

    /// Generate embeddings for a batch of texts
    fn embed_batch(&self, texts: &[&str]) -> Vec<Vec<f32>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

/// Helper to measure duration of a sync operation
pub fn measure_sync<F, T>(f: F) -> (T, Duration)
where
    F: FnOnce() -> T,
{
    let start = std::time::Instant::now();
    let result = f();
    let duration = start.elapsed();
    (result, duration)
}
