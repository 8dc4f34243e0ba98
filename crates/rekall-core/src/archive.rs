//! Archive export/import: a deterministic package of a JSON manifest plus
//! one JSONL stream per table. See `spec.md` §6 "Archive format".

use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entry::{ConnectorImport, Entry, InboxEntry, Source, StagingEntry};
use crate::error::{CoreError, Result};
use crate::storage::{EntryFilter, Storage, SCHEMA_VERSION};

/// Archive manifest: `manifest.json` at the archive root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub schema_version: i64,
    pub exported_at: DateTime<Utc>,
    pub counts: Counts,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Counts {
    pub entries: usize,
    pub inbox_entries: usize,
    pub staging_entries: usize,
    pub sources: usize,
    pub connector_imports: usize,
}

/// An exported entry, with context decompressed and embeddings base64'd
/// (§6: "Entries include the structured context in decompressed form and
/// the raw base64 embeddings").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivedEntry {
    #[serde(flatten)]
    pub entry: Entry,
    pub summary_embedding_b64: Option<String>,
    pub context_embedding_b64: Option<String>,
}

fn encode_vec(v: &Option<Vec<f32>>) -> Option<String> {
    v.as_ref().map(|v| BASE64.encode(v.iter().flat_map(|f| f.to_le_bytes()).collect::<Vec<u8>>()))
}

fn decode_vec(s: &Option<String>) -> Option<Vec<f32>> {
    let bytes = BASE64.decode(s.as_ref()?).ok()?;
    Some(bytes.chunks_exact(4).map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect())
}

fn write_jsonl<T: Serialize>(dir: &Path, name: &str, rows: impl Iterator<Item = T>) -> Result<usize> {
    let mut file = fs::File::create(dir.join(name))?;
    let mut count = 0;
    for row in rows {
        let line = serde_json::to_string(&row).map_err(|e| CoreError::InvalidInput(e.to_string()))?;
        writeln!(file, "{line}")?;
        count += 1;
    }
    Ok(count)
}

fn read_jsonl<T: for<'a> Deserialize<'a>>(dir: &Path, name: &str) -> Result<Vec<T>> {
    let path = dir.join(name);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let reader = BufReader::new(fs::File::open(path)?);
    let mut out = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        out.push(serde_json::from_str(&line).map_err(|e| CoreError::InvalidInput(e.to_string()))?);
    }
    Ok(out)
}

/// Export the full database to the directory at `path` (created if absent).
pub fn export_archive(storage: &Storage, path: &Path) -> Result<Manifest> {
    fs::create_dir_all(path)?;

    let filter = EntryFilter {
        include_deprecated: true,
        ..Default::default()
    };
    let entries: Vec<ArchivedEntry> = storage
        .iter_entries(&filter)?
        .into_iter()
        .map(|e| ArchivedEntry {
            summary_embedding_b64: encode_vec(&e.summary_embedding),
            context_embedding_b64: encode_vec(&e.context_embedding),
            entry: e,
        })
        .collect();
    let entries_count = write_jsonl(path, "entries.jsonl", entries.into_iter())?;

    let inbox: Vec<InboxEntry> = storage.unenriched_inbox(usize::MAX)?;
    let inbox_count = write_jsonl(path, "inbox_entries.jsonl", inbox.into_iter())?;

    let staging: Vec<StagingEntry> = storage.eligible_staging(f64::MIN)?;
    let staging_count = write_jsonl(path, "staging_entries.jsonl", staging.into_iter())?;

    let sources: Vec<Source> = storage.all_sources()?;
    let sources_count = write_jsonl(path, "sources.jsonl", sources.into_iter())?;

    let connector_imports: Vec<ConnectorImport> = storage.all_connector_imports()?;
    let connector_imports_count = write_jsonl(path, "connector_imports.jsonl", connector_imports.into_iter())?;

    let manifest = Manifest {
        schema_version: SCHEMA_VERSION,
        exported_at: Utc::now(),
        counts: Counts {
            entries: entries_count,
            inbox_entries: inbox_count,
            staging_entries: staging_count,
            sources: sources_count,
            connector_imports: connector_imports_count,
        },
    };
    fs::write(
        path.join("manifest.json"),
        serde_json::to_string_pretty(&manifest).map_err(|e| CoreError::InvalidInput(e.to_string()))?,
    )?;
    Ok(manifest)
}

/// Import an archive previously written by [`export_archive`]. Refuses
/// archives whose `schema_version` is newer than the local one. When
/// `dry_run` is true, validates and counts but writes nothing.
pub fn import_archive(storage: &Storage, path: &Path, dry_run: bool) -> Result<Manifest> {
    let manifest_raw = fs::read_to_string(path.join("manifest.json"))?;
    let manifest: Manifest =
        serde_json::from_str(&manifest_raw).map_err(|e| CoreError::InvalidInput(e.to_string()))?;
    if manifest.schema_version > SCHEMA_VERSION {
        return Err(CoreError::InvalidInput(format!(
            "archive schema_version {} is newer than local {}",
            manifest.schema_version, SCHEMA_VERSION
        )));
    }

    let entries: Vec<ArchivedEntry> = read_jsonl(path, "entries.jsonl")?;
    let inbox: Vec<InboxEntry> = read_jsonl(path, "inbox_entries.jsonl")?;
    let staging: Vec<StagingEntry> = read_jsonl(path, "staging_entries.jsonl")?;
    let sources: Vec<Source> = read_jsonl(path, "sources.jsonl")?;
    let connector_imports: Vec<ConnectorImport> = read_jsonl(path, "connector_imports.jsonl")?;

    if dry_run {
        return Ok(manifest);
    }

    for archived in entries {
        let mut entry = archived.entry;
        entry.summary_embedding = decode_vec(&archived.summary_embedding_b64);
        entry.context_embedding = decode_vec(&archived.context_embedding_b64);
        storage.put_entry(&entry)?;
    }
    for row in inbox {
        storage.put_inbox_entry(&row)?;
    }
    for row in staging {
        storage.put_staging_entry(&row)?;
    }
    for source in sources {
        storage.put_source(&source)?;
    }
    for cursor in connector_imports {
        storage.put_connector_cursor(&cursor)?;
    }
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{EntryKind, Reliability, SourceStatus};

    #[test]
    fn roundtrips_sources_and_connector_imports() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(&dir.path().join("rekall.db")).unwrap();
        let source = Source {
            id: "src1".into(),
            domain: "example.com".into(),
            url_pattern: "https://example.com/a".into(),
            reliability: Reliability::A,
            decay_rate: "slow".into(),
            usage_count: 7,
            last_used: Some(Utc::now()),
            personal_score: 0.8,
            status: SourceStatus::Active,
            is_promoted: true,
            promoted_at: Some(Utc::now()),
        };
        storage.put_source(&source).unwrap();
        let cursor = ConnectorImport {
            connector: "claude-cli".into(),
            last_import: Some(Utc::now()),
            last_file_marker: Some("42".into()),
            entries_imported: 3,
            errors_count: 1,
        };
        storage.put_connector_cursor(&cursor).unwrap();

        let archive_dir = dir.path().join("archive");
        let manifest = export_archive(&storage, &archive_dir).unwrap();
        assert_eq!(manifest.counts.sources, 1);
        assert_eq!(manifest.counts.connector_imports, 1);

        let dir2 = tempfile::tempdir().unwrap();
        let storage2 = Storage::open(&dir2.path().join("rekall.db")).unwrap();
        import_archive(&storage2, &archive_dir, false).unwrap();

        let got_source = storage2.get_source("src1").unwrap();
        assert_eq!(got_source.usage_count, 7);
        assert!(got_source.is_promoted);

        let got_cursor = storage2.connector_cursor("claude-cli").unwrap().unwrap();
        assert_eq!(got_cursor.last_file_marker.as_deref(), Some("42"));
        assert_eq!(got_cursor.errors_count, 1);
    }

    #[test]
    fn roundtrips_entries_and_embeddings() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(&dir.path().join("rekall.db")).unwrap();
        let mut e = Entry::new("a".into(), EntryKind::Pattern, "t".into(), "b".into(), Utc::now());
        e.summary_embedding = Some(vec![0.1, 0.2, 0.3]);
        storage.put_entry(&e).unwrap();

        let archive_dir = dir.path().join("archive");
        export_archive(&storage, &archive_dir).unwrap();

        let dir2 = tempfile::tempdir().unwrap();
        let storage2 = Storage::open(&dir2.path().join("rekall.db")).unwrap();
        let manifest = import_archive(&storage2, &archive_dir, false).unwrap();
        assert_eq!(manifest.counts.entries, 1);

        let got = storage2.get_entry("a").unwrap();
        assert_eq!(got.title, "t");
        assert!(got.summary_embedding.is_some());
    }

    #[test]
    fn dry_run_imports_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(&dir.path().join("rekall.db")).unwrap();
        let e = Entry::new("a".into(), EntryKind::Pattern, "t".into(), "b".into(), Utc::now());
        storage.put_entry(&e).unwrap();
        let archive_dir = dir.path().join("archive");
        export_archive(&storage, &archive_dir).unwrap();

        let dir2 = tempfile::tempdir().unwrap();
        let storage2 = Storage::open(&dir2.path().join("rekall.db")).unwrap();
        import_archive(&storage2, &archive_dir, true).unwrap();
        assert!(storage2.get_entry("a").is_err());
    }

    #[test]
    fn refuses_newer_schema_version() {
        let dir = tempfile::tempdir().unwrap();
        let archive_dir = dir.path().join("archive");
        fs::create_dir_all(&archive_dir).unwrap();
        let manifest = Manifest {
            schema_version: SCHEMA_VERSION + 1,
            exported_at: Utc::now(),
            counts: Counts::default(),
        };
        fs::write(archive_dir.join("manifest.json"), serde_json::to_string(&manifest).unwrap()).unwrap();

        let storage = Storage::open(&dir.path().join("rekall.db")).unwrap();
        assert!(import_archive(&storage, &archive_dir, false).is_err());
    }
}
