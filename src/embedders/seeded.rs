//! Deterministic feature-hashing embedder
//!
//! Every token contributes a pseudo-random direction derived from
//! `sha256(seed || token)`. Texts that share tokens end up close together,
//! which gives approximate search strategies realistic neighbourhoods to get
//! wrong.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};

use super::traits::Embedder;

#[derive(Debug, Clone)]
pub struct SeededEmbedder {
    name: String,
    dimensions: usize,
    seed: u64,
}

impl SeededEmbedder {
    pub fn new(dimensions: usize, seed: u64) -> Self {
        Self {
            name: format!("seeded-hash-{}d", dimensions),
            dimensions,
            seed,
        }
    }

    fn token_rng(&self, token: &str) -> StdRng {
        let mut hasher = Sha256::new();
        hasher.update(self.seed.to_le_bytes());
        hasher.update(token.as_bytes());
        let digest: [u8; 32] = hasher.finalize().into();
        StdRng::from_seed(digest)
    }

    fn accumulate(&self, acc: &mut [f32], token: &str) {
        let mut rng = self.token_rng(token);
        for v in acc.iter_mut() {
            *v += rng.random_range(-1.0f32..1.0);
        }
    }
}

impl Embedder for SeededEmbedder {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut acc = vec![0.0f32; self.dimensions];

        let lowered = text.to_lowercase();
        let mut token_count = 0;
        for token in lowered.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()) {
            self.accumulate(&mut acc, token);
            token_count += 1;
        }
        if token_count == 0 {
            self.accumulate(&mut acc, text);
        }

        normalize(&mut acc);
        acc
    }
}

/// L2-normalize in place; the zero vector is left untouched
fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn test_embed_is_deterministic_and_normalized() {
        let embedder = SeededEmbedder::new(64, 42);
        let a = embedder.embed("fn parse_config(path: &Path)");
        let b = embedder.embed("fn parse_config(path: &Path)");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_seed_changes_vectors() {
        let a = SeededEmbedder::new(32, 1).embed("hello world");
        let b = SeededEmbedder::new(32, 2).embed("hello world");
        assert_ne!(a, b);
    }

    #[test]
    fn test_shared_tokens_are_closer() {
        let embedder = SeededEmbedder::new(256, 7);
        let base = embedder.embed("vector search engine benchmark");
        let near = embedder.embed("vector search engine latency");
        let far = embedder.embed("banana bread recipe oven");
        assert!(cosine(&base, &near) > cosine(&base, &far));
    }

    #[test]
    fn test_tokenless_text_still_embeds() {
        let embedder = SeededEmbedder::new(16, 0);
        let v = embedder.embed("   ---   ");
        assert!(v.iter().any(|x| *x != 0.0));
        assert_eq!(embedder.embed_batch(&["a b", "   ---   "])[1], v);
    }
}
