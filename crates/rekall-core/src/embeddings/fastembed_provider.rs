//! Local ONNX inference via `fastembed`. Only compiled with the
//! `embeddings` feature; see `spec.md` §4.3 "the concrete embedding model
//! is an external concern".

use std::sync::{Mutex, OnceLock};

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use super::{l2_normalize, EmbeddingError, EmbeddingProvider};

/// Native output width of `AllMiniLML6V2`, the default fastembed model.
const NATIVE_DIM: usize = 384;

type ModelResult = Result<Mutex<TextEmbedding>, String>;

pub struct FastEmbedProvider {
    model: &'static OnceLock<ModelResult>,
}

impl FastEmbedProvider {
    pub fn new() -> Self {
        static MODEL: OnceLock<ModelResult> = OnceLock::new();
        Self { model: &MODEL }
    }

    fn model(&self) -> Result<std::sync::MutexGuard<'_, TextEmbedding>, EmbeddingError> {
        let result = self.model.get_or_init(|| {
            let options = InitOptions::new(EmbeddingModel::AllMiniLML6V2).with_show_download_progress(false);
            TextEmbedding::try_new(options)
                .map(Mutex::new)
                .map_err(|e| format!("failed to initialize fastembed model: {e}"))
        });
        match result {
            Ok(model) => model.lock().map_err(|e| EmbeddingError::Unavailable(format!("model lock poisoned: {e}"))),
            Err(e) => Err(EmbeddingError::Unavailable(e.clone())),
        }
    }
}

impl Default for FastEmbedProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddingProvider for FastEmbedProvider {
    fn dim(&self) -> usize {
        NATIVE_DIM
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut model = self.model()?;
        let mut vectors = model
            .embed(vec![text], None)
            .map_err(|e| EmbeddingError::Unavailable(e.to_string()))?;
        let mut v = vectors
            .pop()
            .ok_or_else(|| EmbeddingError::Unavailable("fastembed returned no vectors".into()))?;
        l2_normalize(&mut v);
        Ok(v)
    }

    fn is_enabled(&self) -> bool {
        self.model().is_ok()
    }
}
