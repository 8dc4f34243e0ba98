//! Bronze/Silver/Gold persistence: inbox, staging, sources, connector
//! cursors. See `spec.md` §3, §4.8, §4.9.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::entry::{
    ConnectorImport, ContentType, ImportSource, InboxEntry, Reliability, Source, SourceStatus,
    StagingEntry,
};
use crate::error::{CoreError, Result};

use super::connection::Storage;

fn set_from_json(s: &str) -> BTreeSet<String> {
    serde_json::from_str(s).unwrap_or_default()
}

fn row_to_inbox(row: &Row) -> rusqlite::Result<InboxEntry> {
    let import_source: String = row.get("import_source")?;
    Ok(InboxEntry {
        id: row.get("id")?,
        url: row.get("url")?,
        domain: row.get("domain")?,
        cli_source: row.get("cli_source")?,
        project: row.get("project")?,
        conversation_id: row.get("conversation_id")?,
        user_query: row.get("user_query")?,
        assistant_snippet: row.get("assistant_snippet")?,
        captured_at: row.get("captured_at")?,
        import_source: ImportSource::parse(&import_source).unwrap_or(ImportSource::Realtime),
        is_valid: row.get::<_, i64>("is_valid")? != 0,
        validation_error: row.get("validation_error")?,
        enriched_at: row.get("enriched_at")?,
    })
}

fn row_to_staging(row: &Row) -> rusqlite::Result<StagingEntry> {
    let content_type: String = row.get("content_type")?;
    let projects_list: String = row.get("projects_list")?;
    let inbox_ids: String = row.get("inbox_ids")?;
    Ok(StagingEntry {
        id: row.get("id")?,
        url: row.get("url")?,
        domain: row.get("domain")?,
        title: row.get("title")?,
        description: row.get("description")?,
        content_type: ContentType::parse(&content_type).unwrap_or(ContentType::Other),
        language: row.get("language")?,
        is_accessible: row.get::<_, i64>("is_accessible")? != 0,
        http_status: row.get("http_status")?,
        citation_count: row.get("citation_count")?,
        project_count: row.get("project_count")?,
        projects_list: set_from_json(&projects_list),
        first_seen: row.get("first_seen")?,
        last_seen: row.get("last_seen")?,
        promotion_score: row.get("promotion_score")?,
        inbox_ids: set_from_json(&inbox_ids),
        enriched_at: row.get("enriched_at")?,
        promoted_at: row.get("promoted_at")?,
        promoted_to: row.get("promoted_to")?,
    })
}

fn row_to_source(row: &Row) -> rusqlite::Result<Source> {
    let reliability: String = row.get("reliability")?;
    let status: String = row.get("status")?;
    Ok(Source {
        id: row.get("id")?,
        domain: row.get("domain")?,
        url_pattern: row.get("url_pattern")?,
        reliability: Reliability::parse(&reliability).unwrap_or(Reliability::B),
        decay_rate: row.get("decay_rate")?,
        usage_count: row.get("usage_count")?,
        last_used: row.get("last_used")?,
        personal_score: row.get("personal_score")?,
        status: SourceStatus::parse(&status).unwrap_or(SourceStatus::Active),
        is_promoted: row.get::<_, i64>("is_promoted")? != 0,
        promoted_at: row.get("promoted_at")?,
    })
}

impl Storage {
    /// Append a Bronze row. Inbox rows are immutable once written except
    /// for the `enriched_at` stamp (§3 "Lifecycle").
    pub fn put_inbox_entry(&self, entry: &InboxEntry) -> Result<String> {
        entry.validate().map_err(CoreError::InvalidInput)?;
        let conn = self.writer.lock().expect("writer mutex poisoned");
        conn.execute(
            "INSERT INTO inbox_entries (
                id, url, domain, cli_source, project, conversation_id, user_query,
                assistant_snippet, captured_at, import_source, is_valid, validation_error,
                enriched_at
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)",
            params![
                entry.id,
                entry.url,
                entry.domain,
                entry.cli_source,
                entry.project,
                entry.conversation_id,
                entry.user_query,
                entry.assistant_snippet,
                entry.captured_at,
                entry.import_source.as_str(),
                entry.is_valid as i64,
                entry.validation_error,
                entry.enriched_at,
            ],
        )?;
        Ok(entry.id.clone())
    }

    /// Unenriched Bronze rows ordered by `captured_at` ascending (§4.8 step 1).
    pub fn unenriched_inbox(&self, batch_size: usize) -> Result<Vec<InboxEntry>> {
        let conn = self.reader.lock().expect("reader mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT * FROM inbox_entries WHERE enriched_at IS NULL
             ORDER BY captured_at ASC LIMIT ?1",
        )?;
        let rows = stmt.query_map([batch_size as i64], row_to_inbox)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(CoreError::from)
    }

    pub fn mark_inbox_enriched(&self, id: &str, now: DateTime<Utc>) -> Result<()> {
        let conn = self.writer.lock().expect("writer mutex poisoned");
        let changed = conn.execute(
            "UPDATE inbox_entries SET enriched_at = ?2 WHERE id = ?1",
            params![id, now],
        )?;
        if changed == 0 {
            return Err(CoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    pub fn staging_by_url(&self, url: &str) -> Result<Option<StagingEntry>> {
        let conn = self.reader.lock().expect("reader mutex poisoned");
        conn.query_row("SELECT * FROM staging_entries WHERE url = ?1", [url], row_to_staging)
            .optional()
            .map_err(CoreError::from)
    }

    pub fn get_staging(&self, id: &str) -> Result<StagingEntry> {
        let conn = self.reader.lock().expect("reader mutex poisoned");
        conn.query_row("SELECT * FROM staging_entries WHERE id = ?1", [id], row_to_staging)
            .optional()?
            .ok_or_else(|| CoreError::NotFound(id.to_string()))
    }

    /// Insert or update a Silver row (upsert by `id`).
    pub fn put_staging_entry(&self, entry: &StagingEntry) -> Result<String> {
        let conn = self.writer.lock().expect("writer mutex poisoned");
        conn.execute(
            "INSERT INTO staging_entries (
                id, url, domain, title, description, content_type, language,
                is_accessible, http_status, citation_count, project_count, projects_list,
                first_seen, last_seen, promotion_score, inbox_ids, enriched_at,
                promoted_at, promoted_to
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title, description = excluded.description,
                content_type = excluded.content_type, language = excluded.language,
                is_accessible = excluded.is_accessible, http_status = excluded.http_status,
                citation_count = excluded.citation_count, project_count = excluded.project_count,
                projects_list = excluded.projects_list, last_seen = excluded.last_seen,
                promotion_score = excluded.promotion_score, inbox_ids = excluded.inbox_ids,
                enriched_at = excluded.enriched_at, promoted_at = excluded.promoted_at,
                promoted_to = excluded.promoted_to",
            params![
                entry.id,
                entry.url,
                entry.domain,
                entry.title,
                entry.description,
                entry.content_type.as_str(),
                entry.language,
                entry.is_accessible as i64,
                entry.http_status,
                entry.citation_count,
                entry.project_count,
                serde_json::to_string(&entry.projects_list).unwrap_or_else(|_| "[]".into()),
                entry.first_seen,
                entry.last_seen,
                entry.promotion_score,
                serde_json::to_string(&entry.inbox_ids).unwrap_or_else(|_| "[]".into()),
                entry.enriched_at,
                entry.promoted_at,
                entry.promoted_to,
            ],
        )?;
        Ok(entry.id.clone())
    }

    /// Staging rows eligible for promotion: `promoted_at` null, score above
    /// `threshold`, accessible (§4.9 "Eligibility").
    pub fn eligible_staging(&self, threshold: f64) -> Result<Vec<StagingEntry>> {
        let conn = self.reader.lock().expect("reader mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT * FROM staging_entries
             WHERE promoted_at IS NULL AND is_accessible = 1 AND promotion_score >= ?1
             ORDER BY promotion_score DESC",
        )?;
        let rows = stmt.query_map([threshold], row_to_staging)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(CoreError::from)
    }

    pub fn get_source(&self, id: &str) -> Result<Source> {
        let conn = self.reader.lock().expect("reader mutex poisoned");
        conn.query_row("SELECT * FROM sources WHERE id = ?1", [id], row_to_source)
            .optional()?
            .ok_or_else(|| CoreError::NotFound(id.to_string()))
    }

    pub fn source_by_url(&self, url_pattern: &str) -> Result<Option<Source>> {
        let conn = self.reader.lock().expect("reader mutex poisoned");
        conn.query_row(
            "SELECT * FROM sources WHERE url_pattern = ?1 AND status = 'active'",
            [url_pattern],
            row_to_source,
        )
        .optional()
        .map_err(CoreError::from)
    }

    /// Insert or overwrite a Gold row by id, independent of any staging
    /// row (archive import: the source is restored standalone, not created
    /// through the promotion path).
    pub fn put_source(&self, source: &Source) -> Result<()> {
        let conn = self.writer.lock().expect("writer mutex poisoned");
        conn.execute(
            "INSERT INTO sources (
                id, domain, url_pattern, reliability, decay_rate, usage_count,
                last_used, personal_score, status, is_promoted, promoted_at
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)
            ON CONFLICT(id) DO UPDATE SET
                domain = excluded.domain, url_pattern = excluded.url_pattern,
                reliability = excluded.reliability, decay_rate = excluded.decay_rate,
                usage_count = excluded.usage_count, last_used = excluded.last_used,
                personal_score = excluded.personal_score, status = excluded.status,
                is_promoted = excluded.is_promoted, promoted_at = excluded.promoted_at",
            params![
                source.id,
                source.domain,
                source.url_pattern,
                source.reliability.as_str(),
                source.decay_rate,
                source.usage_count,
                source.last_used,
                source.personal_score,
                source.status.as_str(),
                source.is_promoted as i64,
                source.promoted_at,
            ],
        )?;
        Ok(())
    }

    /// Every Gold row, active or deprecated (archive export needs the full
    /// table, not just the currently-active view `source_by_url` serves).
    pub fn all_sources(&self) -> Result<Vec<Source>> {
        let conn = self.reader.lock().expect("reader mutex poisoned");
        let mut stmt = conn.prepare("SELECT * FROM sources")?;
        let rows = stmt.query_map([], row_to_source)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(CoreError::from)
    }

    /// Every connector's persisted resume cursor.
    pub fn all_connector_imports(&self) -> Result<Vec<ConnectorImport>> {
        let conn = self.reader.lock().expect("reader mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT connector, last_import, last_file_marker, entries_imported, errors_count
             FROM connector_imports",
        )?;
        let rows = stmt.query_map([], |r| {
            Ok(ConnectorImport {
                connector: r.get(0)?,
                last_import: r.get(1)?,
                last_file_marker: r.get(2)?,
                entries_imported: r.get(3)?,
                errors_count: r.get(4)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(CoreError::from)
    }

    /// Create a promoted Source and stamp the originating staging row.
    /// Refused with `Conflict` if an active Source with the same
    /// `url_pattern` already exists (§4.9).
    pub fn promote_staging(&self, staging_id: &str, source: &Source) -> Result<()> {
        let mut conn = self.writer.lock().expect("writer mutex poisoned");
        let tx = conn.transaction()?;
        promote_one(&tx, staging_id, source)?;
        tx.commit()?;
        Ok(())
    }

    /// Promote every `(staging_id, source)` pair in a single transaction;
    /// if any one is ineligible or conflicts, the whole batch rolls back
    /// (§4.8 "Auto-promotion is a batch ... if any one fails, the whole
    /// batch rolls back").
    pub fn promote_batch(&self, promotions: &[(String, Source)]) -> Result<()> {
        let mut conn = self.writer.lock().expect("writer mutex poisoned");
        let tx = conn.transaction()?;
        for (staging_id, source) in promotions {
            promote_one(&tx, staging_id, source)?;
        }
        tx.commit()?;
        Ok(())
    }
}

fn promote_one(tx: &rusqlite::Transaction, staging_id: &str, source: &Source) -> Result<()> {
    {
        let conflict: bool = tx
            .query_row(
                "SELECT 1 FROM sources WHERE url_pattern = ?1 AND status = 'active'",
                [&source.url_pattern],
                |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false);
        if conflict {
            return Err(CoreError::Conflict(format!(
                "an active source already exists for {}",
                source.url_pattern
            )));
        }

        tx.execute(
            "INSERT INTO sources (
                id, domain, url_pattern, reliability, decay_rate, usage_count,
                last_used, personal_score, status, is_promoted, promoted_at
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
            params![
                source.id,
                source.domain,
                source.url_pattern,
                source.reliability.as_str(),
                source.decay_rate,
                source.usage_count,
                source.last_used,
                source.personal_score,
                source.status.as_str(),
                source.is_promoted as i64,
                source.promoted_at,
            ],
        )?;

        let changed = tx.execute(
            "UPDATE staging_entries SET promoted_to = ?2, promoted_at = ?3 WHERE id = ?1",
            params![staging_id, source.id, source.promoted_at],
        )?;
        if changed == 0 {
            return Err(CoreError::NotFound(staging_id.to_string()));
        }

        Ok(())
    }
}

impl Storage {
    /// Demote a promoted Source (§4.8 "Demotion"): delete it and clear
    /// `promoted_to`/`promoted_at` on the originating staging row.
    pub fn demote_source(&self, source_id: &str) -> Result<()> {
        let mut conn = self.writer.lock().expect("writer mutex poisoned");
        let tx = conn.transaction()?;

        let is_promoted: bool = tx
            .query_row(
                "SELECT is_promoted FROM sources WHERE id = ?1",
                [source_id],
                |r| r.get::<_, i64>(0),
            )
            .optional()?
            .map(|v| v != 0)
            .ok_or_else(|| CoreError::NotFound(source_id.to_string()))?;
        if !is_promoted {
            return Err(CoreError::InvalidInput(format!(
                "source {source_id} is not promoted"
            )));
        }

        tx.execute(
            "UPDATE staging_entries SET promoted_to = NULL, promoted_at = NULL WHERE promoted_to = ?1",
            [source_id],
        )?;
        tx.execute("DELETE FROM sources WHERE id = ?1", [source_id])?;
        tx.commit()?;
        Ok(())
    }

    pub fn connector_cursor(&self, connector: &str) -> Result<Option<ConnectorImport>> {
        let conn = self.reader.lock().expect("reader mutex poisoned");
        conn.query_row(
            "SELECT connector, last_import, last_file_marker, entries_imported, errors_count
             FROM connector_imports WHERE connector = ?1",
            [connector],
            |r| {
                Ok(ConnectorImport {
                    connector: r.get(0)?,
                    last_import: r.get(1)?,
                    last_file_marker: r.get(2)?,
                    entries_imported: r.get(3)?,
                    errors_count: r.get(4)?,
                })
            },
        )
        .optional()
        .map_err(CoreError::from)
    }

    pub fn put_connector_cursor(&self, cursor: &ConnectorImport) -> Result<()> {
        let conn = self.writer.lock().expect("writer mutex poisoned");
        conn.execute(
            "INSERT INTO connector_imports (
                connector, last_import, last_file_marker, entries_imported, errors_count
            ) VALUES (?1,?2,?3,?4,?5)
            ON CONFLICT(connector) DO UPDATE SET
                last_import = excluded.last_import,
                last_file_marker = excluded.last_file_marker,
                entries_imported = excluded.entries_imported,
                errors_count = excluded.errors_count",
            params![
                cursor.connector,
                cursor.last_import,
                cursor.last_file_marker,
                cursor.entries_imported,
                cursor.errors_count,
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> (tempfile::TempDir, Storage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(&dir.path().join("rekall.db")).unwrap();
        (dir, storage)
    }

    fn inbox(id: &str, url: &str, project: &str) -> InboxEntry {
        InboxEntry {
            id: id.into(),
            url: url.into(),
            domain: "example.com".into(),
            cli_source: "claude-cli".into(),
            project: Some(project.into()),
            conversation_id: None,
            user_query: None,
            assistant_snippet: None,
            captured_at: Utc::now(),
            import_source: ImportSource::Realtime,
            is_valid: true,
            validation_error: None,
            enriched_at: None,
        }
    }

    #[test]
    fn inbox_roundtrips_and_filters_unenriched() {
        let (_dir, storage) = storage();
        storage.put_inbox_entry(&inbox("i1", "https://example.com/a", "p1")).unwrap();
        let unenriched = storage.unenriched_inbox(10).unwrap();
        assert_eq!(unenriched.len(), 1);
        storage.mark_inbox_enriched("i1", Utc::now()).unwrap();
        assert!(storage.unenriched_inbox(10).unwrap().is_empty());
    }

    fn staging(id: &str, url: &str, score: f64) -> StagingEntry {
        let now = Utc::now();
        StagingEntry {
            id: id.into(),
            url: url.into(),
            domain: "example.com".into(),
            title: Some("t".into()),
            description: None,
            content_type: ContentType::Documentation,
            language: None,
            is_accessible: true,
            http_status: Some(200),
            citation_count: 3,
            project_count: 3,
            projects_list: BTreeSet::from(["p1".into(), "p2".into(), "p3".into()]),
            first_seen: now,
            last_seen: now,
            promotion_score: score,
            inbox_ids: BTreeSet::from(["i1".into(), "i2".into(), "i3".into()]),
            enriched_at: Some(now),
            promoted_at: None,
            promoted_to: None,
        }
    }

    #[test]
    fn scenario_4_promotion_threshold() {
        let (_dir, storage) = storage();
        let staging_entry = staging("s1", "https://example.com/a", 9.5);
        storage.put_staging_entry(&staging_entry).unwrap();
        let eligible = storage.eligible_staging(5.0).unwrap();
        assert_eq!(eligible.len(), 1);

        let source = Source {
            id: "src1".into(),
            domain: "example.com".into(),
            url_pattern: staging_entry.url.clone(),
            reliability: Reliability::B,
            decay_rate: "medium".into(),
            usage_count: 0,
            last_used: None,
            personal_score: 0.0,
            status: SourceStatus::Active,
            is_promoted: true,
            promoted_at: Some(Utc::now()),
        };
        storage.promote_staging("s1", &source).unwrap();
        assert!(storage.eligible_staging(5.0).unwrap().is_empty());
        let got = storage.get_staging("s1").unwrap();
        assert_eq!(got.promoted_to.as_deref(), Some("src1"));
    }

    #[test]
    fn scenario_5_demotion_restores_eligibility() {
        let (_dir, storage) = storage();
        let staging_entry = staging("s1", "https://example.com/a", 9.5);
        storage.put_staging_entry(&staging_entry).unwrap();
        let source = Source {
            id: "src1".into(),
            domain: "example.com".into(),
            url_pattern: staging_entry.url.clone(),
            reliability: Reliability::B,
            decay_rate: "medium".into(),
            usage_count: 0,
            last_used: None,
            personal_score: 0.0,
            status: SourceStatus::Active,
            is_promoted: true,
            promoted_at: Some(Utc::now()),
        };
        storage.promote_staging("s1", &source).unwrap();

        storage.demote_source("src1").unwrap();
        assert!(storage.get_source("src1").is_err());
        let got = storage.get_staging("s1").unwrap();
        assert!(got.promoted_to.is_none() && got.promoted_at.is_none());
        assert_eq!(storage.eligible_staging(5.0).unwrap().len(), 1);
    }

    #[test]
    fn promote_conflict_on_existing_active_source() {
        let (_dir, storage) = storage();
        let staging_entry = staging("s1", "https://example.com/a", 9.5);
        storage.put_staging_entry(&staging_entry).unwrap();
        let source = |id: &str| Source {
            id: id.into(),
            domain: "example.com".into(),
            url_pattern: staging_entry.url.clone(),
            reliability: Reliability::B,
            decay_rate: "medium".into(),
            usage_count: 0,
            last_used: None,
            personal_score: 0.0,
            status: SourceStatus::Active,
            is_promoted: true,
            promoted_at: Some(Utc::now()),
        };
        storage.promote_staging("s1", &source("src1")).unwrap();
        let err = storage.promote_staging("s1", &source("src2")).unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[test]
    fn promote_batch_rolls_back_entirely_on_one_conflict() {
        let (_dir, storage) = storage();
        let a = staging("s1", "https://example.com/a", 9.5);
        let b = staging("s2", "https://example.com/b", 9.5);
        storage.put_staging_entry(&a).unwrap();
        storage.put_staging_entry(&b).unwrap();

        let make_source = |id: &str, url: &str| Source {
            id: id.into(),
            domain: "example.com".into(),
            url_pattern: url.into(),
            reliability: Reliability::B,
            decay_rate: "medium".into(),
            usage_count: 0,
            last_used: None,
            personal_score: 0.0,
            status: SourceStatus::Active,
            is_promoted: true,
            promoted_at: Some(Utc::now()),
        };

        // Pre-existing active source collides with b's url, so the whole
        // batch (including a, which is otherwise fine) must roll back.
        storage
            .promote_staging("s2", &make_source("existing", &b.url))
            .unwrap();

        let batch = vec![
            ("s1".to_string(), make_source("src-a", &a.url)),
            ("s2".to_string(), make_source("src-b", &b.url)),
        ];
        assert!(storage.promote_batch(&batch).is_err());
        assert!(storage.get_source("src-a").is_err());
        assert!(storage.get_staging("s1").unwrap().promoted_to.is_none());
    }

    #[test]
    fn connector_cursor_roundtrips() {
        let (_dir, storage) = storage();
        let cursor = ConnectorImport {
            connector: "claude-cli".into(),
            last_import: Some(Utc::now()),
            last_file_marker: Some("file-42".into()),
            entries_imported: 10,
            errors_count: 0,
        };
        storage.put_connector_cursor(&cursor).unwrap();
        let got = storage.connector_cursor("claude-cli").unwrap().unwrap();
        assert_eq!(got.last_file_marker, cursor.last_file_marker);
    }
}
