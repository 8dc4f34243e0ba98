//! Entry CRUD, FTS projection, keyword index, embeddings, and the lazy
//! entry iterator. See `spec.md` §4.1 "Public contract".

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::context_codec::{self, tokenize};
use crate::entry::{Entry, EntryKind, MemoryKind, StructuredContext};
use crate::error::{CoreError, Result};

use super::connection::Storage;
use super::EntryFilter;

/// `(summary_embedding, context_embedding)` for one entry.
type EmbeddingPair = (Option<Vec<f32>>, Option<Vec<f32>>);

fn embedding_to_bytes(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn row_to_entry(row: &Row) -> rusqlite::Result<Entry> {
    let tags_json: String = row.get("tags")?;
    let kind_str: String = row.get("kind")?;
    let memory_kind_str: String = row.get("memory_kind")?;
    Ok(Entry {
        id: row.get("id")?,
        kind: EntryKind::parse(&kind_str).unwrap_or(EntryKind::Reference),
        title: row.get("title")?,
        body: row.get("body")?,
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        project: row.get("project")?,
        memory_kind: MemoryKind::parse(&memory_kind_str).unwrap_or(MemoryKind::Semantic),
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        accessed_at: row.get("accessed_at")?,
        access_count: row.get("access_count")?,
        deprecated: row.get::<_, i64>("deprecated")? != 0,
        ease_factor: row.get("ease_factor")?,
        interval_days: row.get("interval_days")?,
        due_at: row.get("due_at")?,
        last_reviewed_at: row.get("last_reviewed_at")?,
        schema_version: row.get("schema_version")?,
        context: None,
        summary_embedding: None,
        context_embedding: None,
    })
}

impl Storage {
    /// Insert or update `entry` atomically with its FTS projection, context
    /// keyword rows, and embeddings.
    pub fn put_entry(&self, entry: &Entry) -> Result<String> {
        entry
            .validate()
            .map_err(CoreError::InvalidInput)?;

        let mut conn = self.writer.lock().expect("writer mutex poisoned");
        let tx = conn.transaction()?;

        if let Some(existing_created_at) = tx
            .query_row(
                "SELECT created_at FROM entries WHERE id = ?1",
                [&entry.id],
                |r| r.get::<_, DateTime<Utc>>(0),
            )
            .optional()?
        {
            if existing_created_at != entry.created_at {
                return Err(CoreError::Conflict(format!(
                    "entry {} exists with a different created_at",
                    entry.id
                )));
            }
        }

        let (context_blob, keywords): (Option<Vec<u8>>, Vec<String>) = match &entry.context {
            Some(ctx) if ctx.is_persistable() => {
                let (blob, kws) = context_codec::encode(ctx)
                    .map_err(|e| CoreError::CorruptContext(e.to_string()))?;
                (Some(blob), kws)
            }
            _ => (None, Vec::new()),
        };

        tx.execute(
            "INSERT INTO entries (
                id, kind, title, body, tags, project, memory_kind,
                created_at, updated_at, accessed_at, access_count, deprecated,
                ease_factor, interval_days, due_at, last_reviewed_at,
                schema_version, context_blob
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18)
            ON CONFLICT(id) DO UPDATE SET
                kind = excluded.kind, title = excluded.title, body = excluded.body,
                tags = excluded.tags, project = excluded.project, memory_kind = excluded.memory_kind,
                updated_at = excluded.updated_at, accessed_at = excluded.accessed_at,
                access_count = excluded.access_count, deprecated = excluded.deprecated,
                ease_factor = excluded.ease_factor, interval_days = excluded.interval_days,
                due_at = excluded.due_at, last_reviewed_at = excluded.last_reviewed_at,
                schema_version = excluded.schema_version, context_blob = excluded.context_blob",
            params![
                entry.id,
                entry.kind.as_str(),
                entry.title,
                entry.body,
                serde_json::to_string(&entry.tags).unwrap_or_else(|_| "[]".into()),
                entry.project,
                entry.memory_kind.as_str(),
                entry.created_at,
                entry.updated_at,
                entry.accessed_at,
                entry.access_count,
                entry.deprecated as i64,
                entry.ease_factor,
                entry.interval_days,
                entry.due_at,
                entry.last_reviewed_at,
                entry.schema_version,
                context_blob,
            ],
        )?;

        tx.execute("DELETE FROM entries_fts WHERE id = ?1", [&entry.id])?;
        tx.execute(
            "INSERT INTO entries_fts (id, title, body, tags) VALUES (?1,?2,?3,?4)",
            params![entry.id, entry.title, entry.body, entry.tags.join(" ")],
        )?;

        tx.execute("DELETE FROM keyword_index WHERE entry_id = ?1", [&entry.id])?;
        for kw in &keywords {
            tx.execute(
                "INSERT OR IGNORE INTO keyword_index (entry_id, keyword) VALUES (?1,?2)",
                params![entry.id, kw],
            )?;
        }

        tx.execute("DELETE FROM embeddings WHERE entry_id = ?1", [&entry.id])?;
        if let Some(v) = &entry.summary_embedding {
            tx.execute(
                "INSERT INTO embeddings (entry_id, kind, vector, dim) VALUES (?1,'summary',?2,?3)",
                params![entry.id, embedding_to_bytes(v), v.len() as i64],
            )?;
        }
        if let Some(v) = &entry.context_embedding {
            tx.execute(
                "INSERT INTO embeddings (entry_id, kind, vector, dim) VALUES (?1,'context',?2,?3)",
                params![entry.id, embedding_to_bytes(v), v.len() as i64],
            )?;
        }

        tx.commit()?;
        Ok(entry.id.clone())
    }

    /// Fetch an entry by id, decoding its context blob and embeddings.
    /// This does NOT record an access (§4.5: "Every read that materializes
    /// an entry increments access_count" — that bookkeeping belongs to the
    /// facade, which knows whether a given read is user-facing).
    pub fn get_entry(&self, id: &str) -> Result<Entry> {
        let conn = self.reader.lock().expect("reader mutex poisoned");
        Self::get_entry_with(&conn, id)
    }

    pub(super) fn get_entry_with(conn: &Connection, id: &str) -> Result<Entry> {
        let mut entry: Entry = conn
            .query_row("SELECT * FROM entries WHERE id = ?1", [id], row_to_entry)
            .optional()?
            .ok_or_else(|| CoreError::NotFound(id.to_string()))?;

        let blob: Option<Vec<u8>> = conn
            .query_row("SELECT context_blob FROM entries WHERE id = ?1", [id], |r| r.get(0))
            .optional()?
            .flatten();
        if let Some(blob) = blob {
            match context_codec::decode(&blob) {
                Ok(ctx) => entry.context = Some(ctx),
                Err(e) => {
                    tracing::warn!(entry_id = %id, error = %e, "context blob corrupt; returning empty context");
                    entry.context = Some(StructuredContext::default());
                }
            }
        }

        let mut stmt = conn.prepare("SELECT kind, vector FROM embeddings WHERE entry_id = ?1")?;
        let rows = stmt.query_map([id], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, Vec<u8>>(1)?))
        })?;
        for row in rows {
            let (kind, bytes) = row?;
            let vec = bytes_to_embedding(&bytes);
            match kind.as_str() {
                "summary" => entry.summary_embedding = Some(vec),
                "context" => entry.context_embedding = Some(vec),
                _ => {}
            }
        }

        Ok(entry)
    }

    /// Delete an entry, cascading incident links and removing FTS/keyword
    /// rows. `Source`/`StagingEntry` are a separate entity family (§3) and
    /// are never touched by entry deletion.
    pub fn delete_entry(&self, id: &str) -> Result<()> {
        let mut conn = self.writer.lock().expect("writer mutex poisoned");
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM links WHERE source_id = ?1 OR target_id = ?1", [id])?;
        tx.execute("DELETE FROM entries_fts WHERE id = ?1", [id])?;
        tx.execute("DELETE FROM keyword_index WHERE entry_id = ?1", [id])?;
        tx.execute("DELETE FROM embeddings WHERE entry_id = ?1", [id])?;
        let changed = tx.execute("DELETE FROM entries WHERE id = ?1", [id])?;
        tx.commit()?;
        if changed == 0 {
            return Err(CoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Mark `entry_id` as accessed: bump `access_count`, set `accessed_at`.
    pub fn record_access(&self, id: &str, now: DateTime<Utc>) -> Result<()> {
        let conn = self.writer.lock().expect("writer mutex poisoned");
        let changed = conn.execute(
            "UPDATE entries SET access_count = access_count + 1, accessed_at = ?2 WHERE id = ?1",
            params![id, now],
        )?;
        if changed == 0 {
            return Err(CoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// FTS5 full-text candidates, ranked by the engine's own rank (lower is
    /// better in SQLite FTS5's `bm25()`; we return it as-is and let the
    /// caller normalize). The caller provides a pre-sanitized query.
    pub fn fts_candidates(&self, query: &str, limit: usize) -> Result<Vec<(String, f64)>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        // FTS5's implicit match operator is AND; a hybrid search wants any
        // matching term to surface a candidate, with bm25 doing the
        // ranking, so the terms are joined with OR.
        let match_query = query.split_whitespace().collect::<Vec<_>>().join(" OR ");
        let conn = self.reader.lock().expect("reader mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, bm25(entries_fts) AS rank FROM entries_fts
             WHERE entries_fts MATCH ?1 ORDER BY rank LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![match_query, limit as i64], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, f64>(1)?))
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(CoreError::from)
    }

    /// Entries whose keyword index contains any of `tokens`, scored by hit
    /// count (number of distinct token matches).
    pub fn keyword_candidates(&self, tokens: &[String], limit: usize) -> Result<Vec<(String, i64)>> {
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.reader.lock().expect("reader mutex poisoned");
        let placeholders = tokens.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT entry_id, COUNT(DISTINCT keyword) AS hits FROM keyword_index
             WHERE keyword IN ({placeholders})
             GROUP BY entry_id ORDER BY hits DESC LIMIT ?"
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut param_values: Vec<&dyn rusqlite::ToSql> =
            tokens.iter().map(|t| t as &dyn rusqlite::ToSql).collect();
        let limit_i64 = limit as i64;
        param_values.push(&limit_i64);
        let rows = stmt.query_map(param_values.as_slice(), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(CoreError::from)
    }

    /// Fetch summary/context embedding vectors for a set of ids.
    pub fn vectors(&self, ids: &[String]) -> Result<std::collections::HashMap<String, EmbeddingPair>> {
        let mut out = std::collections::HashMap::new();
        if ids.is_empty() {
            return Ok(out);
        }
        let conn = self.reader.lock().expect("reader mutex poisoned");
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT entry_id, kind, vector FROM embeddings WHERE entry_id IN ({placeholders})"
        );
        let mut stmt = conn.prepare(&sql)?;
        let param_values: Vec<&dyn rusqlite::ToSql> =
            ids.iter().map(|i| i as &dyn rusqlite::ToSql).collect();
        let rows = stmt.query_map(param_values.as_slice(), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?, r.get::<_, Vec<u8>>(2)?))
        })?;
        for row in rows {
            let (id, kind, bytes) = row?;
            let entry = out.entry(id).or_insert((None, None));
            let vec = bytes_to_embedding(&bytes);
            match kind.as_str() {
                "summary" => entry.0 = Some(vec),
                "context" => entry.1 = Some(vec),
                _ => {}
            }
        }
        Ok(out)
    }

    /// Materialize all entries matching `filter`. Finite, eager under the
    /// hood (SQLite doesn't give us a cheap way to stay lazy across the
    /// `Mutex` boundary) but presented as a plain `Vec` — "lazy finite
    /// sequence" in the spec means "does not require pre-scanning the whole
    /// table to answer `due_at`/`stale` queries", which the callers in
    /// `memory_tracker`/`pipeline` satisfy by filtering in SQL, not here.
    pub fn iter_entries(&self, filter: &EntryFilter) -> Result<Vec<Entry>> {
        let conn = self.reader.lock().expect("reader mutex poisoned");
        let mut sql = "SELECT * FROM entries WHERE 1=1".to_string();
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if !filter.include_deprecated {
            sql.push_str(" AND deprecated = 0");
        }
        if let Some(project) = &filter.project {
            sql.push_str(" AND project = ?");
            params_vec.push(Box::new(project.clone()));
        }
        if let Some(kind) = filter.kind {
            sql.push_str(" AND kind = ?");
            params_vec.push(Box::new(kind.as_str().to_string()));
        }
        sql.push_str(" ORDER BY id");
        let mut stmt = conn.prepare(&sql)?;
        let refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|b| b.as_ref()).collect();
        let ids = stmt
            .query_map(refs.as_slice(), |r| r.get::<_, String>("id"))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        ids.iter().map(|id| Self::get_entry_with(&conn, id)).collect()
    }

    /// Entries due for review at `now` (§4.5 "Due set at query time").
    pub fn due_entries(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Entry>> {
        let conn = self.reader.lock().expect("reader mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT id FROM entries WHERE due_at <= ?1 AND deprecated = 0 ORDER BY due_at LIMIT ?2",
        )?;
        let ids = stmt
            .query_map(params![now, limit as i64], |r| r.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        ids.iter().map(|id| Self::get_entry_with(&conn, id)).collect()
    }

    /// Entries not accessed within `threshold_days` (§4.5 "stale").
    pub fn stale_entries(&self, threshold_days: i64, now: DateTime<Utc>) -> Result<Vec<Entry>> {
        let cutoff = now - chrono::Duration::days(threshold_days);
        let conn = self.reader.lock().expect("reader mutex poisoned");
        let mut stmt = conn.prepare("SELECT id FROM entries WHERE accessed_at < ?1 ORDER BY accessed_at")?;
        let ids = stmt
            .query_map([cutoff], |r| r.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        ids.iter().map(|id| Self::get_entry_with(&conn, id)).collect()
    }

    /// Tokenize `text` the same way keyword extraction does (§4.2), for
    /// callers building keyword-search tokens from a query string.
    pub fn tokenize_query(text: &str) -> Vec<String> {
        tokenize(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntryKind;

    fn storage() -> (tempfile::TempDir, Storage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(&dir.path().join("rekall.db")).unwrap();
        (dir, storage)
    }

    fn sample_entry(id: &str) -> Entry {
        Entry::new(id.into(), EntryKind::Bug, "CORS fails on Safari".into(), "credentials: include".into(), Utc::now())
    }

    #[test]
    fn put_then_get_roundtrips_all_fields() {
        let (_dir, storage) = storage();
        let mut e = sample_entry("01ENTRY0000000000000000AA");
        e.tags = vec!["web".into()];
        e.context = Some(StructuredContext {
            situation: Some("cors error".into()),
            solution: Some("set header".into()),
            trigger_keywords: vec!["cors".into()],
            ..Default::default()
        });
        storage.put_entry(&e).unwrap();
        let got = storage.get_entry(&e.id).unwrap();
        assert_eq!(got.title, e.title);
        assert_eq!(got.tags, e.tags);
        assert_eq!(got.context.as_ref().unwrap().situation, e.context.as_ref().unwrap().situation);

        let hits = storage.keyword_candidates(&["cors".to_string()], 10).unwrap();
        assert!(hits.iter().any(|(id, count)| id == &e.id && *count >= 1));
    }

    #[test]
    fn put_entry_rejects_invalid() {
        let (_dir, storage) = storage();
        let e = Entry::new("id".into(), EntryKind::Bug, "".into(), "b".into(), Utc::now());
        assert!(storage.put_entry(&e).is_err());
    }

    #[test]
    fn put_entry_conflict_on_mismatched_created_at() {
        let (_dir, storage) = storage();
        let e = sample_entry("id1");
        storage.put_entry(&e).unwrap();
        let mut e2 = e.clone();
        e2.created_at = Utc::now() + chrono::Duration::days(1);
        let err = storage.put_entry(&e2).unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[test]
    fn get_missing_entry_is_not_found() {
        let (_dir, storage) = storage();
        assert!(matches!(storage.get_entry("missing").unwrap_err(), CoreError::NotFound(_)));
    }

    #[test]
    fn delete_entry_cascades_links_and_removes_indexes() {
        let (_dir, storage) = storage();
        let a = sample_entry("a");
        let b = sample_entry("b");
        storage.put_entry(&a).unwrap();
        storage.put_entry(&b).unwrap();
        storage.link(&a.id, &b.id, crate::entry::Relation::Related, None).unwrap();
        storage.delete_entry(&a.id).unwrap();
        assert!(storage.get_entry(&a.id).is_err());
        assert!(storage.neighbors(&b.id, crate::storage::Direction::Both, None).unwrap().is_empty());
    }

    #[test]
    fn fts_empty_query_returns_empty() {
        let (_dir, storage) = storage();
        assert!(storage.fts_candidates("", 10).unwrap().is_empty());
    }
}
