//! TOML configuration (`config.toml`), per `spec.md` §6.
//!
//! Loaded once at [`crate::Core::open`] time. Missing file or missing keys
//! fall back to documented defaults; a malformed file is a hard
//! [`crate::CoreError::InvalidInput`].

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchWeights {
    pub fts: f64,
    pub semantic: f64,
    pub keyword: f64,
}

impl Default for SearchWeights {
    fn default() -> Self {
        Self {
            fts: 0.5,
            semantic: 0.3,
            keyword: 0.2,
        }
    }
}

impl SearchWeights {
    /// Re-normalize so the three weights sum to 1, per §6
    /// ("fusion re-normalizes if they do not sum to 1").
    pub fn normalized(&self) -> (f64, f64, f64) {
        let sum = self.fts + self.semantic + self.keyword;
        if sum <= 0.0 {
            let d = SearchWeights::default();
            return (d.fts, d.semantic, d.keyword);
        }
        (self.fts / sum, self.semantic / sum, self.keyword / sum)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SearchConfig {
    pub weights: SearchWeights,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// Deterministic feature-hashing provider, no external dependencies.
    #[default]
    Hashing,
    /// Local ONNX inference via `fastembed` (requires the `embeddings` build
    /// feature; falls back to `Hashing` with a warning when absent).
    FastEmbed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingsConfig {
    pub enabled: bool,
    pub dim: usize,
    pub backend: EmbeddingBackend,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dim: 384,
            backend: EmbeddingBackend::Hashing,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromotionWeights {
    pub citation: f64,
    pub project: f64,
    pub recency: f64,
}

impl Default for PromotionWeights {
    fn default() -> Self {
        Self {
            citation: 1.0,
            project: 2.0,
            recency: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromotionConfig {
    pub weights: PromotionWeights,
    pub decay_days: i64,
    pub threshold: f64,
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            weights: PromotionWeights::default(),
            decay_days: 30,
            threshold: 5.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub batch_size: usize,
    pub timeout_seconds: f64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            timeout_seconds: 5.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub max_size_bytes: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: 65536,
        }
    }
}

/// Root configuration, mirrors the table in `spec.md` §6.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub search: SearchConfig,
    pub embeddings: EmbeddingsConfig,
    pub promotion: PromotionConfig,
    pub enrichment: EnrichmentConfig,
    pub context: ContextConfig,
}

impl Config {
    /// Load from `path`, falling back to defaults for a missing file.
    /// A file that exists but fails to parse as TOML is `InvalidInput`.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| CoreError::InvalidInput(format!("config.toml: {e}")))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let rendered = toml::to_string_pretty(self)
            .map_err(|e| CoreError::InvalidInput(format!("serializing config: {e}")))?;
        std::fs::write(path, rendered)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let c = Config::default();
        assert_eq!(c.search.weights.fts, 0.5);
        assert_eq!(c.search.weights.semantic, 0.3);
        assert_eq!(c.search.weights.keyword, 0.2);
        assert!(!c.embeddings.enabled);
        assert_eq!(c.embeddings.dim, 384);
        assert_eq!(c.promotion.weights.citation, 1.0);
        assert_eq!(c.promotion.weights.project, 2.0);
        assert_eq!(c.promotion.weights.recency, 0.5);
        assert_eq!(c.promotion.decay_days, 30);
        assert_eq!(c.promotion.threshold, 5.0);
        assert_eq!(c.enrichment.batch_size, 50);
        assert_eq!(c.enrichment.timeout_seconds, 5.0);
        assert_eq!(c.context.max_size_bytes, 65536);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load(&dir.path().join("config.toml")).unwrap();
        assert_eq!(cfg.search.weights.fts, 0.5);
    }

    #[test]
    fn malformed_file_is_invalid_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "not = [valid toml").unwrap();
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }

    #[test]
    fn weights_renormalize_when_not_summing_to_one() {
        let w = SearchWeights {
            fts: 1.0,
            semantic: 1.0,
            keyword: 2.0,
        };
        let (fts, sem, kw) = w.normalized();
        assert!((fts - 0.25).abs() < 1e-9);
        assert!((sem - 0.25).abs() < 1e-9);
        assert!((kw - 0.5).abs() < 1e-9);
    }
}
