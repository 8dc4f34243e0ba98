//! Core API Facade (C10): the single entry point external collaborators
//! (CLI, TUI, agent server) drive. See `spec.md` §4.10.

use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::archive;
use crate::config::Config;
use crate::connectors::{ClaudeCli, Connector, CursorIde};
use crate::embeddings::{EmbeddingProvider, HashingProvider, NullProvider};
use crate::entry::{Entry, Link, Relation, Source};
use crate::error::{CoreError, Result};
use crate::memory_tracker::{self, Rating};
use crate::pipeline::{self, EnrichStats};
use crate::search::{self, SearchResult};
use crate::storage::{Direction, Storage};

const DB_FILE: &str = "rekall.db";
const CONFIG_FILE: &str = "config.toml";

/// Wraps every facade result with the degraded-mode indicator required by
/// the result envelope contract (`spec.md` §4.10): a call can succeed while
/// reporting that part of its pipeline fell back to a reduced mode (e.g.
/// the semantic search channel being unavailable).
#[derive(Debug, Clone)]
pub struct Envelope<T> {
    pub value: T,
    pub degraded: bool,
    pub degraded_reason: Option<String>,
}

impl<T> Envelope<T> {
    fn ok(value: T) -> Self {
        Self {
            value,
            degraded: false,
            degraded_reason: None,
        }
    }

    fn degraded(value: T, reason: impl Into<String>) -> Self {
        Self {
            value,
            degraded: true,
            degraded_reason: Some(reason.into()),
        }
    }
}

/// The knowledge base handle. One process owns one `Core` per data
/// directory; opening a second writer against the same directory fails
/// with [`CoreError::BackendLocked`] rather than corrupting state
/// (`spec.md` §9 "Global mutable state").
pub struct Core {
    storage: Storage,
    config: Config,
    data_dir: PathBuf,
    embedding_provider: Box<dyn EmbeddingProvider>,
}

impl Core {
    /// Open (or initialize) the knowledge base rooted at `data_dir`,
    /// running any pending schema migrations and loading `config.toml`.
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir)?;
        let storage = Storage::open(&data_dir.join(DB_FILE))?;
        let config = Config::load(&data_dir.join(CONFIG_FILE))?;
        let embedding_provider: Box<dyn EmbeddingProvider> = if config.embeddings.enabled {
            Self::build_provider(config.embeddings.backend, config.embeddings.dim)
        } else {
            Box::new(NullProvider)
        };
        Ok(Self {
            storage,
            config,
            data_dir,
            embedding_provider,
        })
    }

    #[cfg(feature = "embeddings")]
    fn build_provider(backend: crate::config::EmbeddingBackend, dim: usize) -> Box<dyn EmbeddingProvider> {
        match backend {
            crate::config::EmbeddingBackend::FastEmbed => Box::new(crate::embeddings::FastEmbedProvider::new()),
            crate::config::EmbeddingBackend::Hashing => Box::new(HashingProvider::new(dim)),
        }
    }

    #[cfg(not(feature = "embeddings"))]
    fn build_provider(backend: crate::config::EmbeddingBackend, dim: usize) -> Box<dyn EmbeddingProvider> {
        if backend == crate::config::EmbeddingBackend::FastEmbed {
            tracing::warn!("embeddings.backend = fastembed requested but the `embeddings` feature is not compiled in; falling back to hashing");
        }
        Box::new(HashingProvider::new(dim))
    }

    /// Close is idempotent: dropping (or re-dropping) a `Core` releases the
    /// process-level lock without error. Provided explicitly so callers
    /// don't need to rely on drop ordering.
    pub fn close(self) {
        drop(self);
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn provider(&self) -> Option<&dyn EmbeddingProvider> {
        if self.embedding_provider.is_enabled() {
            Some(self.embedding_provider.as_ref())
        } else {
            None
        }
    }

    // ---- Entries (C1) ----------------------------------------------

    pub fn add_entry(&self, mut entry: Entry) -> Result<Envelope<String>> {
        entry.validate().map_err(CoreError::InvalidInput)?;
        let mut degraded_reason = None;
        if let Some(provider) = self.provider() {
            if entry.summary_embedding.is_none() {
                match provider.embed(&entry.summary_text()) {
                    Ok(v) => entry.summary_embedding = Some(v),
                    Err(e) => {
                        let err = CoreError::ProviderUnavailable(e.to_string());
                        tracing::warn!(entry_id = %entry.id, error = %err, "failed to embed entry summary");
                        degraded_reason.get_or_insert(err.exit_reason());
                    }
                }
            }
            if entry.context_embedding.is_none() {
                if let Some(text) = entry.context_text() {
                    match provider.embed(&text) {
                        Ok(v) => entry.context_embedding = Some(v),
                        Err(e) => {
                            let err = CoreError::ProviderUnavailable(e.to_string());
                            tracing::warn!(entry_id = %entry.id, error = %err, "failed to embed entry context");
                            degraded_reason.get_or_insert(err.exit_reason());
                        }
                    }
                }
            }
        }
        let id = self.storage.put_entry(&entry)?;
        Ok(match degraded_reason {
            Some(reason) => Envelope::degraded(id, reason),
            None => Envelope::ok(id),
        })
    }

    pub fn update_entry(&self, entry: Entry) -> Result<Envelope<String>> {
        self.add_entry(entry)
    }

    pub fn get_entry(&self, id: &str) -> Result<Entry> {
        let mut entry = self.storage.get_entry(id)?;
        memory_tracker::record_access(&mut entry, Utc::now());
        self.storage.record_access(id, Utc::now())?;
        Ok(entry)
    }

    pub fn delete_entry(&self, id: &str) -> Result<()> {
        self.storage.delete_entry(id)
    }

    // ---- Search (C4) ------------------------------------------------

    pub fn search(&self, query: &str, limit: usize, include_deprecated: bool) -> Result<Envelope<SearchResult>> {
        let result = search::search(
            &self.storage,
            self.provider(),
            &self.config.search.weights,
            query,
            limit,
            include_deprecated,
        )?;
        if result.degraded {
            Ok(Envelope::degraded(result, "semantic channel unavailable"))
        } else {
            Ok(Envelope::ok(result))
        }
    }

    // ---- Knowledge Graph (C6) ---------------------------------------

    pub fn link(&self, source_id: &str, target_id: &str, relation: Relation, reason: Option<&str>) -> Result<()> {
        self.storage.link(source_id, target_id, relation, reason)
    }

    pub fn unlink(&self, source_id: &str, target_id: &str, relation: Relation) -> Result<()> {
        self.storage.unlink(source_id, target_id, relation)
    }

    pub fn related(&self, id: &str, direction: Direction, relation: Option<Relation>) -> Result<Vec<String>> {
        self.storage.neighbors(id, direction, relation)
    }

    /// Full edges adjacent to `id` (relation, reason, creation time), not
    /// just the bare ids [`Core::related`] returns.
    pub fn links(&self, id: &str, direction: Direction, relation: Option<Relation>) -> Result<Vec<Link>> {
        self.storage.links(id, direction, relation)
    }

    pub fn graph(&self, root: &str, depth: usize) -> Result<Vec<(String, usize)>> {
        self.storage.graph(root, depth)
    }

    pub fn deprecate(&self, id: &str, replacement: Option<&str>) -> Result<()> {
        self.storage.deprecate(id, replacement)
    }

    // ---- Memory Tracker (C5) -----------------------------------------

    pub fn review_due(&self, limit: usize) -> Result<Vec<Entry>> {
        self.storage.due_entries(Utc::now(), limit)
    }

    pub fn grade(&self, id: &str, rating: i64) -> Result<Entry> {
        let rating = Rating::new(rating).map_err(|e| CoreError::InvalidInput(e.to_string()))?;
        let mut entry = self.storage.get_entry(id)?;
        memory_tracker::grade(&mut entry, rating, Utc::now());
        self.storage.put_entry(&entry)?;
        Ok(entry)
    }

    pub fn stale(&self, threshold_days: i64) -> Result<Vec<Entry>> {
        self.storage.stale_entries(threshold_days, Utc::now())
    }

    /// Consolidate `source_ids` into a new pattern entry, linking each
    /// source to it as `derived_from` (`spec.md` §4.5 "Generalization").
    pub fn generalize(&self, source_ids: &[String], new_entry: Entry) -> Result<String> {
        if source_ids.is_empty() {
            return Err(CoreError::InvalidInput(
                "generalize requires at least one source entry".into(),
            ));
        }
        new_entry.validate().map_err(CoreError::InvalidInput)?;
        let pattern_id = self.storage.put_entry(&new_entry)?;
        for source_id in source_ids {
            self.storage
                .link(source_id, &pattern_id, Relation::DerivedFrom, None)?;
        }
        Ok(pattern_id)
    }

    // ---- Medallion Pipeline (C7/C8/C9) --------------------------------

    /// Run one ingestion pass for `connector` (or all available connectors
    /// when `None`), writing discovered URLs into the Bronze inbox.
    pub fn inbox_import(&self, connector: Option<&str>, since: Option<&str>) -> Result<usize> {
        let root = self.data_dir.clone();
        let connectors: Vec<Box<dyn Connector>> = vec![
            Box::new(ClaudeCli::new(root.clone())),
            Box::new(CursorIde::new(root)),
        ];
        let mut imported = 0;
        for c in connectors {
            if let Some(name) = connector {
                if c.name() != name {
                    continue;
                }
            }
            if !c.available() {
                continue;
            }
            let mut errors_count = 0i64;
            for source in c.list_history_sources() {
                let marker = since.map(str::to_string).or_else(|| {
                    self.storage
                        .connector_cursor(c.name())
                        .ok()
                        .flatten()
                        .and_then(|cur| cur.last_file_marker)
                });
                // A source that fails to extract doesn't abort the whole
                // connector: its failure is recorded on the cursor and the
                // next source is still attempted.
                let rows = match c.extract(&source, marker.as_deref()) {
                    Ok(rows) => rows,
                    Err(e) => {
                        tracing::warn!(connector = c.name(), source = %source.display(), error = %e, "inbox extraction failed");
                        errors_count += 1;
                        continue;
                    }
                };
                for row in &rows {
                    self.storage.put_inbox_entry(row)?;
                }
                let row_count = rows.len() as i64;
                imported += rows.len();
                let new_marker = c.provide_marker(&source);
                self.storage.put_connector_cursor(&crate::entry::ConnectorImport {
                    connector: c.name().to_string(),
                    last_import: Some(Utc::now()),
                    last_file_marker: new_marker,
                    entries_imported: row_count,
                    errors_count,
                })?;
            }
        }
        Ok(imported)
    }

    pub fn enrich_batch(&self) -> Result<EnrichStats> {
        pipeline::enrich_batch(&self.storage, &self.config)
    }

    pub fn promote(&self, staging_id: &str) -> Result<Source> {
        pipeline::promote(&self.storage, staging_id, &self.config.promotion, Utc::now())
    }

    pub fn promote_auto(&self) -> Result<Vec<Source>> {
        pipeline::promote_auto(&self.storage, &self.config.promotion, Utc::now())
    }

    pub fn demote(&self, source_id: &str) -> Result<()> {
        self.storage.demote_source(source_id)
    }

    // ---- Archive -------------------------------------------------------

    pub fn export_archive(&self, path: &Path) -> Result<archive::Manifest> {
        archive::export_archive(&self.storage, path)
    }

    pub fn import_archive(&self, path: &Path, dry_run: bool) -> Result<archive::Manifest> {
        archive::import_archive(&self.storage, path, dry_run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntryKind;
    use crate::ids::new_id;

    fn temp_core() -> (tempfile::TempDir, Core) {
        let dir = tempfile::tempdir().unwrap();
        let core = Core::open(dir.path()).unwrap();
        (dir, core)
    }

    #[test]
    fn add_and_get_entry_roundtrips() {
        let (_dir, core) = temp_core();
        let entry = Entry::new(new_id(), EntryKind::Bug, "title".into(), "body".into(), Utc::now());
        let id = core.add_entry(entry).unwrap().value;
        let got = core.get_entry(&id).unwrap();
        assert_eq!(got.title, "title");
        assert_eq!(got.access_count, 1);
    }

    #[test]
    fn search_returns_envelope() {
        let (_dir, core) = temp_core();
        let entry = Entry::new(new_id(), EntryKind::Bug, "rust borrow checker".into(), "fix lifetime issue".into(), Utc::now());
        core.add_entry(entry).unwrap();
        let result = core.search("borrow checker", 10, false).unwrap();
        assert!(!result.value.hits.is_empty());
    }

    #[test]
    fn generalize_links_sources_to_new_pattern() {
        let (_dir, core) = temp_core();
        let a = Entry::new(new_id(), EntryKind::Bug, "a".into(), "bug a".into(), Utc::now());
        let b = Entry::new(new_id(), EntryKind::Bug, "b".into(), "bug b".into(), Utc::now());
        let a_id = core.add_entry(a).unwrap().value;
        let b_id = core.add_entry(b).unwrap().value;

        let pattern = Entry::new(new_id(), EntryKind::Pattern, "pattern".into(), "shared root cause".into(), Utc::now());
        let pattern_id = core.generalize(&[a_id.clone(), b_id.clone()], pattern).unwrap();

        let related = core.related(&pattern_id, Direction::Incoming, Some(Relation::DerivedFrom)).unwrap();
        assert_eq!(related.len(), 2);
        assert!(related.contains(&a_id));
        assert!(related.contains(&b_id));
    }

    #[test]
    fn second_open_on_same_dir_is_locked() {
        let dir = tempfile::tempdir().unwrap();
        let core1 = Core::open(dir.path()).unwrap();
        match Core::open(dir.path()) {
            Err(CoreError::BackendLocked) => {}
            other => panic!("expected BackendLocked, got {other:?}", other = other.is_ok()),
        }
        drop(core1);
        assert!(Core::open(dir.path()).is_ok());
    }

    #[test]
    fn grade_updates_review_schedule() {
        let (_dir, core) = temp_core();
        let entry = Entry::new(new_id(), EntryKind::Til, "t".into(), "b".into(), Utc::now());
        let id = core.add_entry(entry).unwrap().value;
        let graded = core.grade(&id, 5).unwrap();
        assert!(graded.due_at.is_some());
    }
}
