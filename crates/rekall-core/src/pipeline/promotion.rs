//! Scoring & Promotion (C9). See `spec.md` §4.9.

use chrono::{DateTime, Utc};

use crate::config::PromotionConfig;
use crate::entry::{Reliability, Source, SourceStatus, StagingEntry};
use crate::error::{CoreError, Result};
use crate::ids::new_id_at;
use crate::storage::Storage;

/// Promotion score, a pure function of a staging row and config (§4.9):
/// `w_cite·citation_count + w_proj·project_count + w_rec·recency`, with
/// `recency = max(0, 1 - days_since_last_seen / decay_days)`.
pub fn score(staging: &StagingEntry, config: &PromotionConfig, now: DateTime<Utc>) -> f64 {
    let days_since_last_seen =
        ((now - staging.last_seen).num_milliseconds() as f64 / 86_400_000.0).max(0.0);
    let recency = (1.0 - days_since_last_seen / config.decay_days as f64).max(0.0);
    config.weights.citation * staging.citation_count as f64
        + config.weights.project * staging.project_count as f64
        + config.weights.recency * recency
}

fn new_source(staging: &StagingEntry, now: DateTime<Utc>) -> Source {
    Source {
        id: new_id_at(now),
        domain: staging.domain.clone(),
        url_pattern: staging.url.clone(),
        reliability: Reliability::B,
        decay_rate: "medium".to_string(),
        usage_count: 0,
        last_used: None,
        personal_score: 0.0,
        status: SourceStatus::Active,
        is_promoted: true,
        promoted_at: Some(now),
    }
}

/// Promote a single staging row on demand. Refused with `InvalidInput` if
/// not eligible (§4.9 "Eligibility"), `Conflict` if already promoted or if
/// an active Source with the same `url_pattern` exists.
pub fn promote(storage: &Storage, staging_id: &str, config: &PromotionConfig, now: DateTime<Utc>) -> Result<Source> {
    let staging = storage.get_staging(staging_id)?;
    if staging.promoted_at.is_some() {
        return Err(CoreError::Conflict(format!(
            "staging entry {staging_id} is already promoted"
        )));
    }
    if !staging.is_accessible || staging.promotion_score < config.threshold {
        return Err(CoreError::InvalidInput(format!(
            "staging entry {staging_id} is not eligible for promotion (score {:.2} < threshold {:.2}, accessible={})",
            staging.promotion_score, config.threshold, staging.is_accessible
        )));
    }
    let source = new_source(&staging, now);
    storage.promote_staging(staging_id, &source)?;
    Ok(source)
}

/// Enumerate eligible staging rows and promote them all in one transaction
/// (§4.8 "Auto-promotion"). Returns the created sources; if any promotion
/// in the batch would fail (e.g. a url_pattern collision), none are
/// applied.
pub fn promote_auto(storage: &Storage, config: &PromotionConfig, now: DateTime<Utc>) -> Result<Vec<Source>> {
    let eligible = storage.eligible_staging(config.threshold)?;
    let mut batch = Vec::with_capacity(eligible.len());
    let mut sources = Vec::with_capacity(eligible.len());
    for staging in &eligible {
        let source = new_source(staging, now);
        batch.push((staging.id.clone(), source.clone()));
        sources.push(source);
    }
    if batch.is_empty() {
        return Ok(Vec::new());
    }
    storage.promote_batch(&batch)?;
    Ok(sources)
}
