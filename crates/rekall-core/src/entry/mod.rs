//! Data model — Entry, StructuredContext, Link, Source, InboxEntry,
//! StagingEntry, ConnectorImport. Mirrors `spec.md` §3 verbatim.

mod context;
mod graph_types;
mod medallion;

pub use context::StructuredContext;
pub use graph_types::{Link, Relation};
pub use medallion::{
    ConnectorImport, ContentType, ImportSource, InboxEntry, Reliability, Source, SourceStatus,
    StagingEntry,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of captured knowledge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Bug,
    Pattern,
    Decision,
    Pitfall,
    Config,
    Reference,
    Snippet,
    Til,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Bug => "bug",
            EntryKind::Pattern => "pattern",
            EntryKind::Decision => "decision",
            EntryKind::Pitfall => "pitfall",
            EntryKind::Config => "config",
            EntryKind::Reference => "reference",
            EntryKind::Snippet => "snippet",
            EntryKind::Til => "til",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "bug" => EntryKind::Bug,
            "pattern" => EntryKind::Pattern,
            "decision" => EntryKind::Decision,
            "pitfall" => EntryKind::Pitfall,
            "config" => EntryKind::Config,
            "reference" => EntryKind::Reference,
            "snippet" => EntryKind::Snippet,
            "til" => EntryKind::Til,
            _ => return None,
        })
    }
}

/// Episodic vs semantic, per the GLOSSARY.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    Episodic,
    Semantic,
}

impl MemoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryKind::Episodic => "episodic",
            MemoryKind::Semantic => "semantic",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "episodic" => MemoryKind::Episodic,
            "semantic" => MemoryKind::Semantic,
            _ => return None,
        })
    }
}

/// A unit of captured knowledge. See `spec.md` §3 "Entry".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub id: String,
    pub kind: EntryKind,
    pub title: String,
    pub body: String,
    pub tags: Vec<String>,
    pub project: Option<String>,
    pub memory_kind: MemoryKind,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
    pub access_count: i64,
    pub deprecated: bool,
    pub ease_factor: f64,
    pub interval_days: i64,
    pub due_at: Option<DateTime<Utc>>,
    pub last_reviewed_at: Option<DateTime<Utc>>,
    pub schema_version: i64,
    pub context: Option<StructuredContext>,
    pub summary_embedding: Option<Vec<f32>>,
    pub context_embedding: Option<Vec<f32>>,
}

/// Maximum body size in bytes, per invariant in `spec.md` §3.
pub const MAX_BODY_BYTES: usize = 100 * 1024;

/// Minimum ease factor, per invariant in `spec.md` §3.
pub const MIN_EASE_FACTOR: f64 = 1.3;

impl Entry {
    /// Construct a new entry with the defaults named in `spec.md` §3.
    pub fn new(id: String, kind: EntryKind, title: String, body: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            kind,
            title,
            body,
            tags: Vec::new(),
            project: None,
            memory_kind: MemoryKind::Semantic,
            created_at: now,
            updated_at: now,
            accessed_at: now,
            access_count: 0,
            deprecated: false,
            ease_factor: 2.5,
            interval_days: 0,
            due_at: None,
            last_reviewed_at: None,
            schema_version: crate::storage::SCHEMA_VERSION,
            context: None,
            summary_embedding: None,
            context_embedding: None,
        }
    }

    /// Validate the invariants in `spec.md` §3 that are checkable without
    /// consulting the database (id uniqueness, keyword-index existence, and
    /// embedding dimensionality are checked by the storage layer).
    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("title must not be empty".into());
        }
        if self.body.len() > MAX_BODY_BYTES {
            return Err(format!(
                "body size {} exceeds max {}",
                self.body.len(),
                MAX_BODY_BYTES
            ));
        }
        if self.ease_factor < MIN_EASE_FACTOR {
            return Err(format!(
                "ease_factor {} below minimum {}",
                self.ease_factor, MIN_EASE_FACTOR
            ));
        }
        Ok(())
    }

    /// Text embedded for the summary vector: title + body + tags, per §4.3.
    pub fn summary_text(&self) -> String {
        format!("{}\n{}\n{}", self.title, self.body, self.tags.join(" "))
    }

    /// Text embedded for the context vector: situation + solution, per §4.3.
    /// `None` when there is no persisted context.
    pub fn context_text(&self) -> Option<String> {
        let ctx = self.context.as_ref()?;
        Some(format!(
            "{}\n{}",
            ctx.situation.as_deref().unwrap_or(""),
            ctx.solution.as_deref().unwrap_or("")
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_title() {
        let e = Entry::new("id".into(), EntryKind::Bug, "  ".into(), "body".into(), Utc::now());
        assert!(e.validate().is_err());
    }

    #[test]
    fn rejects_oversized_body() {
        let e = Entry::new(
            "id".into(),
            EntryKind::Bug,
            "t".into(),
            "a".repeat(MAX_BODY_BYTES + 1),
            Utc::now(),
        );
        assert!(e.validate().is_err());
    }

    #[test]
    fn rejects_ease_factor_below_minimum() {
        let mut e = Entry::new("id".into(), EntryKind::Bug, "t".into(), "b".into(), Utc::now());
        e.ease_factor = 1.0;
        assert!(e.validate().is_err());
    }

    #[test]
    fn default_entry_is_valid() {
        let e = Entry::new("id".into(), EntryKind::Bug, "t".into(), "b".into(), Utc::now());
        assert!(e.validate().is_ok());
    }
}
