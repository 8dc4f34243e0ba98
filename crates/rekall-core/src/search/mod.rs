//! Search Engine (C4): fuse FTS, semantic, and keyword channels into a
//! ranked result list. See `spec.md` §4.4.

mod sanitize;

pub use sanitize::sanitize_query;

use std::collections::HashMap;

use crate::config::SearchWeights;
use crate::context_codec::tokenize;
use crate::embeddings::{cosine_similarity, EmbeddingProvider};
use crate::entry::Entry;
use crate::error::{CoreError, Result};
use crate::memory_tracker::consolidation;
use crate::storage::Storage;
use chrono::Utc;

/// Per-channel and fused score for one result.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelScores {
    pub fts: f64,
    pub semantic: f64,
    pub keyword: f64,
    pub fused: f64,
}

/// One ranked search result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub entry: Entry,
    pub scores: ChannelScores,
    pub snippet: String,
}

/// Outcome of a search, carrying the degraded-mode flag required by the
/// result envelope contract in `spec.md` §4.10.
#[derive(Debug, Clone, Default)]
pub struct SearchResult {
    pub hits: Vec<SearchHit>,
    pub degraded: bool,
}

fn min_max_normalize(values: &HashMap<String, f64>) -> HashMap<String, f64> {
    if values.is_empty() {
        return HashMap::new();
    }
    let min = values.values().cloned().fold(f64::INFINITY, f64::min);
    let max = values.values().cloned().fold(f64::NEG_INFINITY, f64::max);
    if (max - min).abs() < f64::EPSILON {
        return values.keys().map(|k| (k.clone(), 1.0)).collect();
    }
    values
        .iter()
        .map(|(k, v)| (k.clone(), (v - min) / (max - min)))
        .collect()
}

/// Run a hybrid search against `storage`, per the pipeline in `spec.md`
/// §4.4. `provider` is `None` when embeddings are disabled; a `Some` whose
/// `is_enabled()` is false or whose `embed` call raises also degrades the
/// semantic channel rather than failing the whole search.
pub fn search(
    storage: &Storage,
    provider: Option<&dyn EmbeddingProvider>,
    weights: &SearchWeights,
    query: &str,
    limit: usize,
    include_deprecated: bool,
) -> Result<SearchResult> {
    let sanitized = sanitize_query(query);
    if sanitized.trim().is_empty() {
        return Ok(SearchResult::default());
    }

    let k1 = (4 * limit).clamp(1, 200);
    let fts_hits = storage.fts_candidates(&sanitized, k1)?;
    let query_tokens = tokenize(&sanitized);
    let keyword_hits = storage.keyword_candidates(&query_tokens, k1)?;

    let mut candidate_ids: Vec<String> = fts_hits.iter().map(|(id, _)| id.clone()).collect();
    for (id, _) in &keyword_hits {
        if !candidate_ids.contains(id) {
            candidate_ids.push(id.clone());
        }
    }

    let mut degraded = false;
    let mut semantic_raw: HashMap<String, f64> = HashMap::new();
    let semantic_enabled = provider.is_some_and(|p| p.is_enabled());
    if semantic_enabled {
        let provider = provider.unwrap();
        match provider.embed(&sanitized) {
            Ok(query_vec) => {
                let vectors = storage.vectors(&candidate_ids)?;
                for id in &candidate_ids {
                    if let Some((summary, context)) = vectors.get(id) {
                        let s = summary
                            .as_ref()
                            .map(|v| cosine_similarity(&query_vec, v) as f64)
                            .unwrap_or(f64::MIN);
                        let c = context
                            .as_ref()
                            .map(|v| cosine_similarity(&query_vec, v) as f64)
                            .unwrap_or(f64::MIN);
                        let best = s.max(c);
                        if best > f64::MIN {
                            semantic_raw.insert(id.clone(), best);
                        }
                    }
                }
            }
            Err(e) => {
                let err = CoreError::ProviderUnavailable(e.to_string());
                tracing::warn!(error = %err, "semantic search channel unavailable");
                degraded = true;
            }
        }
    }

    let fts_raw: HashMap<String, f64> = fts_hits.into_iter().collect();
    let keyword_raw: HashMap<String, f64> =
        keyword_hits.into_iter().map(|(id, n)| (id, n as f64)).collect();

    let fts_norm = min_max_normalize(&fts_raw);
    let semantic_norm = min_max_normalize(&semantic_raw);
    let keyword_norm = min_max_normalize(&keyword_raw);

    let (w_fts, w_semantic, w_keyword) = weights.normalized();

    let now = Utc::now();

    let mut hits = Vec::new();
    for id in &candidate_ids {
        let entry = match storage.get_entry(id) {
            Ok(e) => e,
            Err(_) => continue,
        };
        if entry.deprecated && !include_deprecated {
            continue;
        }
        let scores = ChannelScores {
            fts: *fts_norm.get(id).unwrap_or(&0.0),
            semantic: *semantic_norm.get(id).unwrap_or(&0.0),
            keyword: *keyword_norm.get(id).unwrap_or(&0.0),
            fused: 0.0,
        };
        let fused = w_fts * scores.fts + w_semantic * scores.semantic + w_keyword * scores.keyword;
        let snippet = snippet_for(&entry);
        hits.push(SearchHit {
            scores: ChannelScores { fused, ..scores },
            snippet,
            entry,
        });
    }

    hits.sort_by(|a, b| {
        b.scores
            .fused
            .partial_cmp(&a.scores.fused)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                let ca = consolidation(&a.entry, now);
                let cb = consolidation(&b.entry, now);
                cb.partial_cmp(&ca).unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| b.entry.updated_at.cmp(&a.entry.updated_at))
            .then_with(|| a.entry.id.cmp(&b.entry.id))
    });
    hits.truncate(limit);

    Ok(SearchResult { hits, degraded })
}

fn snippet_for(entry: &Entry) -> String {
    const MAX_LEN: usize = 160;
    let body = entry.body.trim();
    if body.len() <= MAX_LEN {
        body.to_string()
    } else {
        let cut = (0..=MAX_LEN).rev().find(|&i| body.is_char_boundary(i)).unwrap_or(0);
        format!("{}…", &body[..cut])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SearchWeights;
    use crate::embeddings::HashingProvider;
    use crate::entry::EntryKind;

    fn storage() -> (tempfile::TempDir, Storage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(&dir.path().join("rekall.db")).unwrap();
        (dir, storage)
    }

    fn entry(id: &str, title: &str, body: &str, tags: &[&str]) -> Entry {
        let mut e = Entry::new(id.into(), EntryKind::Bug, title.into(), body.into(), Utc::now());
        e.tags = tags.iter().map(|s| s.to_string()).collect();
        e
    }

    #[test]
    fn empty_query_returns_empty_result() {
        let (_dir, storage) = storage();
        let weights = SearchWeights::default();
        let result = search(&storage, None, &weights, "   ", 10, false).unwrap();
        assert!(result.hits.is_empty());
    }

    #[test]
    fn scenario_1_hybrid_search_fts_only() {
        let (_dir, storage) = storage();
        storage
            .put_entry(&entry("a", "CORS fails on Safari", "credentials: include breaks fetch", &[]))
            .unwrap();
        storage
            .put_entry(&entry("b", "Cross-origin handling pattern", "browser API call pattern", &["architecture"]))
            .unwrap();
        storage
            .put_entry(&entry("c", "MDN CORS guide", "reference documentation", &["docs"]))
            .unwrap();

        let weights = SearchWeights::default();
        let result = search(&storage, None, &weights, "browser blocking API calls", 10, false).unwrap();
        assert!(!result.hits.is_empty());
        assert!(!result.degraded);
    }

    #[test]
    fn scenario_2_keyword_disambiguation() {
        let (_dir, storage) = storage();
        let mut bug1 = entry("bug1", "Timeout in prod", "something timed out", &[]);
        bug1.context = Some(crate::entry::StructuredContext {
            trigger_keywords: vec!["connection pool".into(), "deploy".into()],
            situation: Some("timeout after deploy".into()),
            ..Default::default()
        });
        let mut bug2 = entry("bug2", "Timeout in prod", "something timed out", &[]);
        bug2.context = Some(crate::entry::StructuredContext {
            trigger_keywords: vec!["retry".into(), "backoff".into()],
            situation: Some("retry didn't work".into()),
            ..Default::default()
        });
        storage.put_entry(&bug1).unwrap();
        storage.put_entry(&bug2).unwrap();

        let weights = SearchWeights::default();
        let result = search(&storage, None, &weights, "timeout after deploy", 10, false).unwrap();
        let ids: Vec<_> = result.hits.iter().map(|h| h.entry.id.clone()).collect();
        assert_eq!(ids.first().map(|s| s.as_str()), Some("bug1"));
    }

    #[test]
    fn deprecated_excluded_unless_opted_in() {
        let (_dir, storage) = storage();
        let e = entry("a", "deprecated thing", "body text here", &[]);
        storage.put_entry(&e).unwrap();
        storage.deprecate("a", None).unwrap();

        let weights = SearchWeights::default();
        let result = search(&storage, None, &weights, "deprecated thing", 10, false).unwrap();
        assert!(result.hits.is_empty());
        let result = search(&storage, None, &weights, "deprecated thing", 10, true).unwrap();
        assert_eq!(result.hits.len(), 1);
    }

    #[test]
    fn semantic_channel_used_when_provider_enabled() {
        let (_dir, storage) = storage();
        let provider = HashingProvider::new(32);
        let mut e = entry("a", "vector search test", "embedding body", &[]);
        e.summary_embedding = Some(provider.embed(&e.summary_text()).unwrap());
        storage.put_entry(&e).unwrap();

        let weights = SearchWeights::default();
        let result = search(&storage, Some(&provider as &dyn EmbeddingProvider), &weights, "vector search test", 10, false).unwrap();
        assert!(!result.hits.is_empty());
        assert!(result.hits[0].scores.semantic >= 0.0);
    }
}
