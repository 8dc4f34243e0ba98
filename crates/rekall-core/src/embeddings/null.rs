//! Null embedding provider: the semantic component returns 0 for every
//! candidate, per `spec.md` §4.3 ("it may be the null provider").

use super::{EmbeddingError, EmbeddingProvider};

/// Default provider when `embeddings.enabled = false`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProvider;

impl EmbeddingProvider for NullProvider {
    fn dim(&self) -> usize {
        0
    }

    fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::Unavailable("embeddings are disabled".into()))
    }

    fn is_enabled(&self) -> bool {
        false
    }
}
