//! Embedding Gateway (C3). See `spec.md` §4.3.
//!
//! The concrete embedding model is an external concern (`spec.md` §1): the
//! core only depends on [`EmbeddingProvider`], a `dim()` and an `embed()`
//! call, plus cosine similarity over L2-normalized vectors. A process-wide
//! [`NullProvider`] ships by default (`embeddings.enabled = false`); a
//! deterministic [`HashingProvider`] is provided for tests and as a
//! dependency-free local fallback. [`FastEmbedProvider`], gated behind the
//! `embeddings` build feature, runs local ONNX inference for production use.

mod hashing;
mod null;

#[cfg(feature = "embeddings")]
mod fastembed_provider;

pub use hashing::HashingProvider;
pub use null::NullProvider;

#[cfg(feature = "embeddings")]
pub use fastembed_provider::FastEmbedProvider;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding provider unavailable: {0}")]
    Unavailable(String),
}

/// Capability set an embedding provider must implement. Implementations
/// must be deterministic on identical input, per `spec.md` §4.3.
pub trait EmbeddingProvider: Send + Sync {
    /// Required output dimensionality.
    fn dim(&self) -> usize;

    /// Embed `text`, returning an L2-normalized vector of length `dim()`.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Whether this provider actually produces embeddings (the semantic
    /// search channel is skipped entirely when this is false).
    fn is_enabled(&self) -> bool {
        true
    }
}

/// L2-normalize a vector in place so cosine similarity reduces to a dot
/// product, per `spec.md` §4.3.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| (*x as f64) * (*x as f64)).sum::<f64>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x = (*x as f64 / norm) as f32;
        }
    }
}

/// Cosine similarity between two vectors. Returns 0.0 for mismatched
/// dimensions or zero vectors rather than panicking.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| (*x as f64) * (*y as f64)).sum();
    let na: f64 = a.iter().map(|x| (*x as f64) * (*x as f64)).sum::<f64>().sqrt();
    let nb: f64 = b.iter().map(|x| (*x as f64) * (*x as f64)).sum::<f64>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    (dot / (na * nb)) as f32
}
