//! Medallion Pipeline (C8) and Scoring & Promotion (C9). See `spec.md`
//! §4.8, §4.9.

mod enrichment;
mod promotion;

pub use enrichment::{enrich_batch, EnrichStats};
pub use promotion::{promote, promote_auto, score};
