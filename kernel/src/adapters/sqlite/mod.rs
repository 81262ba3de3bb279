// SQLite Backend
//
// Durable snapshots plus the full inverse delta log. A snapshot bump
// and its delta row are written in one transaction.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Mutex, MutexGuard};
use rusqlite::{params, Connection, ErrorCode, OpenFlags, OptionalExtension};
use tracing::info;

use crate::log::{BackendError, Delta, StorageBackend};
use crate::state::{Data, Record, RecordId, Update, Version};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS records (
        id INTEGER PRIMARY KEY,
        version INTEGER NOT NULL,
        data_json TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS record_deltas (
        id INTEGER NOT NULL,
        version_before_delta INTEGER NOT NULL,
        inverse_json TEXT NOT NULL,
        PRIMARY KEY (id, version_before_delta)
    );
";

/// Read-only connections opened next to the writer for file databases.
const READ_CONNECTIONS: usize = 4;

/// SQLite-backed persistent store.
///
/// Writers reach the single read-write connection through `&mut self`
/// without locking. File databases also keep a small pool of read-only
/// connections so concurrent readers do not queue on one connection; an
/// in-memory database is private to its connection, so its readers share
/// the writer.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
    readers: Vec<Mutex<Connection>>,
    next_reader: AtomicUsize,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend")
            .field("path", &self.path)
            .field("readers", &self.readers.len())
            .finish()
    }
}

impl SqliteBackend {
    /// Open (or create) the database at `path`.
    ///
    /// With `reset_on_start` any existing database file is removed first.
    pub fn open(path: impl AsRef<Path>, reset_on_start: bool) -> Result<Self, BackendError> {
        let path = path.as_ref();

        if reset_on_start {
            for file in [path.to_path_buf(), sidecar(path, "-wal"), sidecar(path, "-shm")] {
                remove_if_exists(&file)?;
            }
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(SCHEMA)?;

        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let readers = (0..READ_CONNECTIONS)
            .map(|_| Connection::open_with_flags(path, flags).map(Mutex::new))
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            path = %path.display(),
            reset_on_start,
            readers = readers.len(),
            "sqlite_backend: opened"
        );
        Ok(Self {
            conn: Mutex::new(conn),
            readers,
            next_reader: AtomicUsize::new(0),
            path: Some(path.to_path_buf()),
        })
    }

    pub fn open_in_memory() -> Result<Self, BackendError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            readers: Vec::new(),
            next_reader: AtomicUsize::new(0),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// A connection for reads: any idle pooled reader, else the next one
    /// in rotation.
    fn reader(&self) -> MutexGuard<'_, Connection> {
        if self.readers.is_empty() {
            return self.conn.lock();
        }
        if let Some(idle) = self.readers.iter().find_map(|reader| reader.try_lock()) {
            return idle;
        }
        let slot = self.next_reader.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        self.readers[slot].lock()
    }
}

/// Decode a stored version column; versions start at 1.
fn stored_version(id: RecordId, column: &'static str, raw: i64) -> Result<Version, BackendError> {
    match Version::try_from(raw) {
        Ok(version) if version >= 1 => Ok(version),
        _ => Err(BackendError::Corrupt { id, column, value: raw }),
    }
}

fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

fn remove_if_exists(path: &Path) -> Result<(), BackendError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn write_snapshot(conn: &Connection, record: &Record) -> Result<(), BackendError> {
    let json = serde_json::to_string(&record.data)?;
    conn.execute(
        "INSERT INTO records (id, version, data_json) VALUES (?1, ?2, ?3)
         ON CONFLICT(id) DO UPDATE SET version = excluded.version, data_json = excluded.data_json",
        params![record.id.0, record.version as i64, json],
    )?;
    Ok(())
}

fn write_delta(conn: &Connection, delta: &Delta) -> Result<(), BackendError> {
    let json = serde_json::to_string(&delta.inverse_update)?;
    conn.execute(
        "INSERT INTO record_deltas (id, version_before_delta, inverse_json) VALUES (?1, ?2, ?3)",
        params![delta.id.0, delta.version_before_delta as i64, json],
    )?;
    Ok(())
}

impl StorageBackend for SqliteBackend {
    fn keeps_history(&self) -> bool {
        true
    }

    fn load_snapshot(&self, id: RecordId) -> Result<Option<Record>, BackendError> {
        let conn = self.reader();
        let row = conn
            .query_row(
                "SELECT version, data_json FROM records WHERE id = ?1",
                params![id.0],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((version, json)) => {
                let version = stored_version(id, "records.version", version)?;
                let data: Data = serde_json::from_str(&json)?;
                Ok(Some(Record {
                    id,
                    version,
                    data,
                }))
            }
        }
    }

    fn store_snapshot(&mut self, record: &Record) -> Result<(), BackendError> {
        write_snapshot(self.conn.get_mut(), record)
    }

    fn insert_delta(&mut self, delta: &Delta) -> Result<(), BackendError> {
        write_delta(self.conn.get_mut(), delta)
    }

    fn query_deltas(&self, id: RecordId, min_version: Version) -> Result<Vec<Delta>, BackendError> {
        let conn = self.reader();
        let mut stmt = conn.prepare(
            "SELECT version_before_delta, inverse_json FROM record_deltas
             WHERE id = ?1 AND version_before_delta >= ?2
             ORDER BY version_before_delta DESC",
        )?;
        let rows = stmt
            .query_map(params![id.0, min_version as i64], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(version_before_delta, json)| -> Result<Delta, BackendError> {
                let version_before_delta = stored_version(
                    id,
                    "record_deltas.version_before_delta",
                    version_before_delta,
                )?;
                let inverse_update: Update = serde_json::from_str(&json)?;
                Ok(Delta {
                    id,
                    version_before_delta,
                    inverse_update,
                })
            })
            .collect()
    }

    fn try_create(&mut self, record: &Record) -> Result<(), BackendError> {
        let json = serde_json::to_string(&record.data)?;
        let result = self.conn.get_mut().execute(
            "INSERT INTO records (id, version, data_json) VALUES (?1, ?2, ?3)",
            params![record.id.0, record.version as i64, json],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                Err(BackendError::AlreadyExists(record.id))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn commit_update(&mut self, snapshot: &Record, delta: &Delta) -> Result<(), BackendError> {
        let tx = self.conn.get_mut().transaction()?;
        write_delta(&tx, delta)?;
        write_snapshot(&tx, snapshot)?;
        tx.commit()?;
        Ok(())
    }
}
