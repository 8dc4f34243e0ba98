//! Deterministic hashing-trick embedding provider.
//!
//! Not a real semantic model — a dependency-free, fully local provider that
//! is deterministic on identical input (the one hard requirement `spec.md`
//! §4.3 places on providers) and gives tests a non-trivial semantic channel
//! without pulling in an ONNX runtime. Production deployments are expected
//! to supply a model-backed provider (e.g. `fastembed`) behind this same
//! trait; the core never depends on which one is used.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use super::{l2_normalize, EmbeddingError, EmbeddingProvider};
use crate::context_codec::tokenize;

pub struct HashingProvider {
    dim: usize,
}

impl HashingProvider {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }
}

impl Default for HashingProvider {
    fn default() -> Self {
        Self::new(384)
    }
}

impl EmbeddingProvider for HashingProvider {
    fn dim(&self) -> usize {
        self.dim
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut v = vec![0f32; self.dim];
        let tokens = tokenize(text);
        if tokens.is_empty() {
            // Still a valid embedding: a zero vector normalizes to itself.
            return Ok(v);
        }
        for token in &tokens {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let bucket = (hasher.finish() as usize) % self.dim;
            v[bucket] += 1.0;
        }
        l2_normalize(&mut v);
        Ok(v)
    }
}
