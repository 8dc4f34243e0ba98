//! `CursorIde` — reads a workspace-storage key-value database and extracts
//! URLs by regex from stored chat payloads. See `spec.md` §4.7, §6
//! "Tool-history input contracts".
//!
//! Cursor (like VS Code, which it forks) keeps per-workspace state in a
//! `state.vscdb` SQLite file with a single `ItemTable(key TEXT, value BLOB)`
//! table. Chat history is stored under keys containing `"chat"` or
//! `"aiService"`; this connector treats the value as opaque text and
//! regex-scans it for URLs rather than parsing Cursor's internal JSON
//! shape, which is undocumented and changes across versions.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::Utc;
use regex::Regex;
use rusqlite::Connection;

use crate::entry::{ImportSource, InboxEntry};
use crate::error::Result;

use super::{build_inbox_entry, Connector};

fn url_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"https?://[^\s"'<>\\]+"#).unwrap())
}

pub struct CursorIde {
    /// Root directory containing one subdirectory per workspace, each with
    /// a `state.vscdb` file.
    pub root: PathBuf,
}

impl CursorIde {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn workspace_name(&self, source: &Path) -> Option<String> {
        source
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
    }
}

impl Connector for CursorIde {
    fn name(&self) -> &'static str {
        "cursor-ide"
    }

    fn available(&self) -> bool {
        self.root.is_dir()
    }

    fn list_history_sources(&self) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return Vec::new();
        };
        let mut files: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path().join("state.vscdb"))
            .filter(|p| p.is_file())
            .collect();
        files.sort();
        files
    }

    fn extract(&self, source: &Path, since_marker: Option<&str>) -> Result<Vec<InboxEntry>> {
        Ok(self.scan(source, since_marker)?.0)
    }

    fn provide_marker(&self, source: &Path) -> Option<String> {
        let (_, match_index) = self.scan(source, None).ok()?;
        Some(match_index.to_string())
    }
}

impl CursorIde {
    /// Shared scan pass: returns the extracted entries plus the final raw
    /// match position reached (pre-dedup), so `provide_marker` can persist
    /// a position the next `extract` call can resume from exactly — the
    /// dedup set is per-call and must never factor into the marker, or a
    /// URL repeated across batches would be reprocessed as new.
    fn scan(&self, source: &Path, since_marker: Option<&str>) -> Result<(Vec<InboxEntry>, usize)> {
        let skip: usize = since_marker.and_then(|m| m.parse().ok()).unwrap_or(0);
        let project = self.workspace_name(source);

        let conn = Connection::open_with_flags(
            source,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
        )?;
        let mut stmt = conn.prepare(
            "SELECT key, value FROM ItemTable
             WHERE key LIKE '%chat%' OR key LIKE '%aiService%'
             ORDER BY key",
        )?;
        let rows = stmt.query_map([], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, Vec<u8>>(1)?))
        })?;

        let mut out = Vec::new();
        let mut seen = std::collections::HashSet::new();
        let mut match_index = 0usize;
        for row in rows {
            let (key, value) = row?;
            let text = String::from_utf8_lossy(&value).into_owned();
            for m in url_pattern().find_iter(&text) {
                let url = m.as_str().trim_end_matches(['.', ',', ')']);
                if match_index < skip {
                    match_index += 1;
                    continue;
                }
                match_index += 1;
                if !seen.insert(url.to_string()) {
                    continue;
                }
                out.push(build_inbox_entry(
                    url,
                    self.name(),
                    project.clone(),
                    Some(key.clone()),
                    None,
                    None,
                    Utc::now(),
                    ImportSource::Realtime,
                ));
            }
        }
        Ok((out, match_index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_workspace_db(dir: &Path, name: &str, rows: &[(&str, &str)]) -> PathBuf {
        let ws_dir = dir.join(name);
        fs::create_dir_all(&ws_dir).unwrap();
        let db_path = ws_dir.join("state.vscdb");
        let conn = Connection::open(&db_path).unwrap();
        conn.execute_batch("CREATE TABLE ItemTable (key TEXT UNIQUE, value BLOB)").unwrap();
        for (key, value) in rows {
            conn.execute(
                "INSERT INTO ItemTable (key, value) VALUES (?1, ?2)",
                rusqlite::params![key, value.as_bytes()],
            )
            .unwrap();
        }
        db_path
    }

    #[test]
    fn extracts_urls_from_chat_payloads() {
        let dir = tempfile::tempdir().unwrap();
        let db = make_workspace_db(
            dir.path(),
            "my-project",
            &[(
                "workbench.panel.aiService.chatdata",
                r#"{"messages":[{"text":"see https://developer.mozilla.org/docs/cors for details."}]}"#,
            )],
        );
        let connector = CursorIde::new(dir.path().to_path_buf());
        let entries = connector.extract(&db, None).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].url, "https://developer.mozilla.org/docs/cors");
        assert_eq!(entries[0].project.as_deref(), Some("my-project"));
    }

    #[test]
    fn ignores_non_chat_keys() {
        let dir = tempfile::tempdir().unwrap();
        let db = make_workspace_db(
            dir.path(),
            "p",
            &[("editor.fontSize", "https://unrelated.example/should-not-appear")],
        );
        let connector = CursorIde::new(dir.path().to_path_buf());
        assert!(connector.extract(&db, None).unwrap().is_empty());
    }

    #[test]
    fn dedupes_repeated_urls() {
        let dir = tempfile::tempdir().unwrap();
        let db = make_workspace_db(
            dir.path(),
            "p",
            &[("chat.history", "https://a.example/x https://a.example/x")],
        );
        let connector = CursorIde::new(dir.path().to_path_buf());
        assert_eq!(connector.extract(&db, None).unwrap().len(), 1);
    }

    #[test]
    fn provide_marker_resumes_past_a_repeated_url_without_reemitting_it() {
        let dir = tempfile::tempdir().unwrap();
        let db = make_workspace_db(
            dir.path(),
            "p",
            &[("chat.history", "https://a.example/x https://b.example/y https://a.example/x")],
        );
        let connector = CursorIde::new(dir.path().to_path_buf());

        let first = connector.extract(&db, None).unwrap();
        assert_eq!(first.len(), 2);
        let marker = connector.provide_marker(&db).unwrap();

        let resumed = connector.extract(&db, Some(&marker)).unwrap();
        assert!(resumed.is_empty(), "resuming from the marker must not re-emit already-committed rows");
    }

    #[test]
    fn list_history_sources_finds_state_vscdb_files() {
        let dir = tempfile::tempdir().unwrap();
        make_workspace_db(dir.path(), "ws1", &[]);
        let connector = CursorIde::new(dir.path().to_path_buf());
        assert_eq!(connector.list_history_sources().len(), 1);
    }
}
