//! Connection management: single-writer/many-reader SQLite access, process
//! file lock, and PRAGMA configuration. See `spec.md` §5.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use fs2::FileExt;
use rusqlite::Connection;

use crate::error::{CoreError, Result};

use super::migrations::run_migrations;

/// Storage layer: one writer connection, one reader connection, both guarded
/// by a `Mutex` (not `RwLock`) because `rusqlite::Connection` is `!Sync`.
/// A process-level advisory lock file enforces the single-writer-per-file
/// rule across processes (`BackendLocked`, per `spec.md` §5/§7).
pub struct Storage {
    pub(super) writer: Mutex<Connection>,
    pub(super) reader: Mutex<Connection>,
    /// Held for the lifetime of `Storage`; releasing it (on drop) frees the
    /// file for another process to open for writing.
    _lock_file: File,
}

fn configure_connection(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;",
    )?;
    Ok(())
}

impl Storage {
    /// Open (creating if absent) the database file at `path`, running any
    /// pending migrations.
    pub fn open(path: &Path) -> Result<Self> {
        let lock_file = Self::acquire_lock(path)?;

        let mut writer = Connection::open(path)?;
        configure_connection(&writer)?;
        run_migrations(&mut writer, Some(path))?;

        let reader = Connection::open(path)?;
        configure_connection(&reader)?;

        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            _lock_file: lock_file,
        })
    }

    fn acquire_lock(db_path: &Path) -> Result<File> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let lock_path: PathBuf = db_path.with_extension("lock");
        let file = File::options().create(true).truncate(false).write(true).open(&lock_path)?;
        file.try_lock_exclusive().map_err(|_| CoreError::BackendLocked)?;
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rekall.db");
        (dir, path)
    }

    #[test]
    fn open_runs_migrations() {
        let (_dir, path) = temp_db();
        let storage = Storage::open(&path).unwrap();
        let conn = storage.writer.lock().unwrap();
        let version: i64 = conn
            .query_row("SELECT version FROM schema_meta", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, super::super::SCHEMA_VERSION);
    }

    #[test]
    fn second_writer_on_same_file_is_locked() {
        let (_dir, path) = temp_db();
        let _first = Storage::open(&path).unwrap();
        let second = Storage::open(&path);
        assert!(matches!(second, Err(CoreError::BackendLocked)));
    }
}
