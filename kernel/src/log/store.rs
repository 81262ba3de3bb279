// Record Storage Abstraction
//
// Defines the durability contract the versioned store runs on.
// Implementations may keep state in memory, in SQLite, etc.
//
// This module defines *interfaces only*.

use super::{Delta, LogError};
use crate::state::{Record, RecordId, Version};

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("record {0} already exists")]
    AlreadyExists(RecordId),

    #[error("record {id} has corrupt {column} value {value}")]
    Corrupt {
        id: RecordId,
        column: &'static str,
        value: i64,
    },

    #[error("delta log error: {0}")]
    Log(#[from] LogError),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage backend for snapshots and inverse deltas.
///
/// Properties required from implementations:
/// - One snapshot per record, always the latest version
/// - Delta rows are append-only and never mutated
/// - `commit_update` is atomic: readers observe both writes or neither
///
/// Reads take `&self` and writes take `&mut self`; the store serializes
/// them with its own reader/writer lock.
pub trait StorageBackend: Send + Sync {
    /// Whether delta rows are retained. Backends without history can only
    /// serve the latest version of a record.
    fn keeps_history(&self) -> bool;

    fn load_snapshot(&self, id: RecordId) -> Result<Option<Record>, BackendError>;

    fn store_snapshot(&mut self, record: &Record) -> Result<(), BackendError>;

    fn insert_delta(&mut self, delta: &Delta) -> Result<(), BackendError>;

    /// Delta rows for `id` with `version_before_delta >= min_version`,
    /// ordered by `version_before_delta` descending.
    fn query_deltas(&self, id: RecordId, min_version: Version) -> Result<Vec<Delta>, BackendError>;

    /// Insert `record` unless its id is taken.
    ///
    /// Must fail with [`BackendError::AlreadyExists`] on collision.
    fn try_create(&mut self, record: &Record) -> Result<(), BackendError>;

    /// Persist the bumped snapshot and its delta row as one unit.
    fn commit_update(&mut self, snapshot: &Record, delta: &Delta) -> Result<(), BackendError>;
}
