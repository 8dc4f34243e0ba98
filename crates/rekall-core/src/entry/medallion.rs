//! Gold (`Source`), Bronze (`InboxEntry`), Silver (`StagingEntry`), and
//! `ConnectorImport` — the Medallion pipeline entities. See `spec.md` §3.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Reliability {
    A,
    B,
    C,
}

impl Reliability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reliability::A => "A",
            Reliability::B => "B",
            Reliability::C => "C",
        }
    }
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "A" => Reliability::A,
            "B" => Reliability::B,
            "C" => Reliability::C,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Active,
    Inaccessible,
    Archived,
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Active => "active",
            SourceStatus::Inaccessible => "inaccessible",
            SourceStatus::Archived => "archived",
        }
    }
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "active" => SourceStatus::Active,
            "inaccessible" => SourceStatus::Inaccessible,
            "archived" => SourceStatus::Archived,
            _ => return None,
        })
    }
}

/// A curated documentation reference (Gold tier). See `spec.md` §3 "Source".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub domain: String,
    pub url_pattern: String,
    pub reliability: Reliability,
    /// `fast` / `medium` / `slow`.
    pub decay_rate: String,
    pub usage_count: i64,
    pub last_used: Option<DateTime<Utc>>,
    pub personal_score: f64,
    pub status: SourceStatus,
    pub is_promoted: bool,
    pub promoted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportSource {
    Realtime,
    HistoryImport,
}

impl ImportSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportSource::Realtime => "realtime",
            ImportSource::HistoryImport => "history_import",
        }
    }
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "realtime" => ImportSource::Realtime,
            "history_import" => ImportSource::HistoryImport,
            _ => return None,
        })
    }
}

/// A raw captured URL with provenance (Bronze tier). See `spec.md` §3
/// "InboxEntry".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxEntry {
    pub id: String,
    pub url: String,
    pub domain: String,
    pub cli_source: String,
    pub project: Option<String>,
    pub conversation_id: Option<String>,
    pub user_query: Option<String>,
    pub assistant_snippet: Option<String>,
    pub captured_at: DateTime<Utc>,
    pub import_source: ImportSource,
    pub is_valid: bool,
    pub validation_error: Option<String>,
    pub enriched_at: Option<DateTime<Utc>>,
}

impl InboxEntry {
    pub fn validate(&self) -> Result<(), String> {
        if self.url.trim().is_empty() {
            return Err("url must not be empty".into());
        }
        if self.cli_source.trim().is_empty() {
            return Err("cli_source must not be empty".into());
        }
        if !self.is_valid && self.validation_error.as_deref().unwrap_or("").is_empty() {
            return Err("validation_error must be set when is_valid is false".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Documentation,
    Repository,
    Forum,
    Blog,
    Api,
    Paper,
    Other,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Documentation => "documentation",
            ContentType::Repository => "repository",
            ContentType::Forum => "forum",
            ContentType::Blog => "blog",
            ContentType::Api => "api",
            ContentType::Paper => "paper",
            ContentType::Other => "other",
        }
    }
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "documentation" => ContentType::Documentation,
            "repository" => ContentType::Repository,
            "forum" => ContentType::Forum,
            "blog" => ContentType::Blog,
            "api" => ContentType::Api,
            "paper" => ContentType::Paper,
            "other" => ContentType::Other,
            _ => return None,
        })
    }
}

/// A deduplicated, enriched URL (Silver tier). See `spec.md` §3
/// "StagingEntry".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingEntry {
    pub id: String,
    pub url: String,
    pub domain: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub content_type: ContentType,
    pub language: Option<String>,
    pub is_accessible: bool,
    pub http_status: Option<i32>,
    pub citation_count: i64,
    pub project_count: i64,
    pub projects_list: BTreeSet<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub promotion_score: f64,
    pub inbox_ids: BTreeSet<String>,
    pub enriched_at: Option<DateTime<Utc>>,
    pub promoted_at: Option<DateTime<Utc>>,
    pub promoted_to: Option<String>,
}

impl StagingEntry {
    /// Recompute `citation_count`/`project_count` from their backing sets,
    /// per the invariant "citation_count equals |inbox_ids|".
    pub fn recompute_counts(&mut self) {
        self.citation_count = self.inbox_ids.len() as i64;
        self.project_count = self.projects_list.len() as i64;
    }
}

/// Per-connector incremental cursor. See `spec.md` §3 "ConnectorImport".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorImport {
    pub connector: String,
    pub last_import: Option<DateTime<Utc>>,
    pub last_file_marker: Option<String>,
    pub entries_imported: i64,
    pub errors_count: i64,
}
