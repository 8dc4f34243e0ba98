//! Bronze→Silver enrichment. See `spec.md` §4.8.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use scraper::{Html, Selector};

use crate::config::{Config, PromotionConfig};
use crate::entry::{ContentType, InboxEntry, StagingEntry};
use crate::error::Result;
use crate::ids::new_id;
use crate::pipeline::promotion;
use crate::storage::Storage;

/// HTTP client concurrency during enrichment (`spec.md` §5 "bounded
/// concurrency (default 8) to protect the local network and remote
/// servers").
const FETCH_CONCURRENCY: usize = 8;

/// Outcome of one `enrich_batch` call.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnrichStats {
    pub processed: usize,
    pub merged: usize,
    pub created: usize,
    pub fetch_failures: usize,
}

/// Run one enrichment batch (§4.8 "Bronze→Silver enrichment"). Rows with
/// `is_valid = false` are skipped entirely and remain unmarked — rejected
/// URLs are never enriched, per §4.7.
///
/// Rows are grouped by URL first: each group merges into one staging row and
/// must observe its own Bronze rows in captured_at order (§5 "Within an
/// enrichment batch, staging rows observe Bronze rows in captured_at
/// order"), so a group is processed sequentially by a single worker. Groups
/// for distinct URLs are independent and run across a bounded pool of
/// `FETCH_CONCURRENCY` worker threads (§5 "HTTP client ... bounded
/// concurrency (default 8)").
pub fn enrich_batch(storage: &Storage, config: &Config) -> Result<EnrichStats> {
    let rows: Vec<InboxEntry> = storage
        .unenriched_inbox(config.enrichment.batch_size)?
        .into_iter()
        .filter(|row| row.is_valid)
        .collect();
    let timeout = Duration::from_secs_f64(config.enrichment.timeout_seconds.max(0.1));

    let mut order: Vec<String> = Vec::new();
    let mut by_url: std::collections::HashMap<String, Vec<InboxEntry>> = std::collections::HashMap::new();
    for row in rows {
        by_url.entry(row.url.clone()).or_insert_with(|| {
            order.push(row.url.clone());
            Vec::new()
        });
        by_url.get_mut(&row.url).unwrap().push(row);
    }
    let groups: Vec<Vec<InboxEntry>> = order
        .into_iter()
        .map(|url| by_url.remove(&url).unwrap_or_default())
        .collect();
    let processed = AtomicUsize::new(0);
    let merged = AtomicUsize::new(0);
    let created = AtomicUsize::new(0);
    let fetch_failures = AtomicUsize::new(0);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(FETCH_CONCURRENCY)
        .build()
        .expect("failed to build enrichment thread pool");
    pool.install(|| {
        use rayon::prelude::*;
        groups.par_iter().for_each(|group| {
            for row in group {
                let outcome = match process_row(storage, row, &config.promotion, timeout) {
                    Ok(outcome) => outcome,
                    // Leave enriched_at unset: the row is retried on the next pass.
                    Err(_) => continue,
                };
                match outcome {
                    RowOutcome::Merged => {
                        merged.fetch_add(1, Ordering::Relaxed);
                    }
                    RowOutcome::Created { fetch_failed } => {
                        created.fetch_add(1, Ordering::Relaxed);
                        if fetch_failed {
                            fetch_failures.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                };
                if storage.mark_inbox_enriched(&row.id, Utc::now()).is_ok() {
                    processed.fetch_add(1, Ordering::Relaxed);
                }
            }
        });
    });

    Ok(EnrichStats {
        processed: processed.load(Ordering::Relaxed),
        merged: merged.load(Ordering::Relaxed),
        created: created.load(Ordering::Relaxed),
        fetch_failures: fetch_failures.load(Ordering::Relaxed),
    })
}

/// Whether a row merged into an existing staging entry (same URL already
/// enriched) or caused a new one to be created, and whether creation's
/// metadata fetch failed.
enum RowOutcome {
    Merged,
    Created { fetch_failed: bool },
}

fn process_row(
    storage: &Storage,
    row: &InboxEntry,
    promotion_config: &PromotionConfig,
    timeout: Duration,
) -> Result<RowOutcome> {
    let now = Utc::now();
    let (mut entry, outcome) = match storage.staging_by_url(&row.url)? {
        Some(mut existing) => {
            existing.inbox_ids.insert(row.id.clone());
            if let Some(project) = &row.project {
                existing.projects_list.insert(project.clone());
            }
            existing.last_seen = now;
            existing.recompute_counts();
            (existing, RowOutcome::Merged)
        }
        None => {
            let (title, description, language, is_accessible, http_status) =
                fetch_metadata(&row.url, timeout);
            let content_type = classify_content_type(&row.url, &row.domain);
            let mut projects_list = std::collections::BTreeSet::new();
            if let Some(project) = &row.project {
                projects_list.insert(project.clone());
            }
            let mut inbox_ids = std::collections::BTreeSet::new();
            inbox_ids.insert(row.id.clone());
            let entry = StagingEntry {
                id: new_id(),
                url: row.url.clone(),
                domain: row.domain.clone(),
                title,
                description,
                content_type,
                language,
                is_accessible,
                http_status,
                citation_count: 1,
                project_count: projects_list.len() as i64,
                projects_list,
                first_seen: now,
                last_seen: now,
                promotion_score: 0.0,
                inbox_ids,
                enriched_at: Some(now),
                promoted_at: None,
                promoted_to: None,
            };
            (entry, RowOutcome::Created { fetch_failed: !is_accessible })
        }
    };
    entry.promotion_score = promotion::score(&entry, promotion_config, now);
    storage.put_staging_entry(&entry)?;
    Ok(outcome)
}

/// Fetch `url` with a bounded timeout and no retry; parse HTML for title,
/// meta description, and `html[lang]`. On 4xx/5xx or network error this
/// returns `is_accessible = false` rather than propagating — a failed
/// fetch is still a completed enrichment step (§4.8 step 2b).
fn fetch_metadata(
    url: &str,
    timeout: Duration,
) -> (Option<String>, Option<String>, Option<String>, bool, Option<i32>) {
    let client = match reqwest::blocking::Client::builder().timeout(timeout).build() {
        Ok(c) => c,
        Err(_) => return (None, None, None, false, None),
    };
    let response = match client.get(url).send() {
        Ok(r) => r,
        Err(e) => {
            let err = crate::error::CoreError::FetchFailed(e.to_string());
            tracing::warn!(url, error = %err, "enrichment fetch failed");
            return (None, None, None, false, None);
        }
    };
    let status = response.status().as_u16() as i32;
    if !response.status().is_success() {
        let err = crate::error::CoreError::FetchFailed(format!("{url} returned status {status}"));
        tracing::warn!(url, error = %err, "enrichment fetch returned non-success status");
        return (None, None, None, false, Some(status));
    }
    let Ok(body) = response.text() else {
        return (None, None, None, false, Some(status));
    };
    let (title, description, lang) = parse_html_metadata(&body);
    (title, description, lang, true, Some(status))
}

fn parse_html_metadata(body: &str) -> (Option<String>, Option<String>, Option<String>) {
    let document = Html::parse_document(body);

    let title_selector = Selector::parse("title").unwrap();
    let title = document
        .select(&title_selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty());

    let description_selector = Selector::parse(r#"meta[name="description"]"#).unwrap();
    let description = document
        .select(&description_selector)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(str::to_string);

    let html_selector = Selector::parse("html").unwrap();
    let lang = document
        .select(&html_selector)
        .next()
        .and_then(|el| el.value().attr("lang"))
        .map(str::to_string);

    (title, description, lang)
}

/// Classify content_type by domain/URL heuristics (§4.8 step 2b).
fn classify_content_type(url: &str, domain: &str) -> ContentType {
    let lower_url = url.to_ascii_lowercase();
    let lower_domain = domain.to_ascii_lowercase();

    if ["github.com", "gitlab.com", "bitbucket.org", "sourcehut.org"]
        .iter()
        .any(|d| lower_domain.ends_with(d))
    {
        return ContentType::Repository;
    }
    if lower_domain.contains("arxiv.org") || lower_domain.ends_with("acm.org") {
        return ContentType::Paper;
    }
    if ["stackoverflow.com", "reddit.com", "news.ycombinator.com", "discourse"]
        .iter()
        .any(|d| lower_domain.contains(d))
    {
        return ContentType::Forum;
    }
    if ["medium.com", "dev.to", "substack.com"].iter().any(|d| lower_domain.contains(d))
        || lower_domain.starts_with("blog.")
    {
        return ContentType::Blog;
    }
    if lower_domain.starts_with("api.") || lower_url.contains("/api/") {
        return ContentType::Api;
    }
    if lower_domain.starts_with("docs.") || lower_url.contains("/docs/") || lower_domain.contains("readthedocs") {
        return ContentType::Documentation;
    }
    ContentType::Other
}
