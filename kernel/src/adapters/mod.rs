// Storage Adapters
//
// Concrete backends and the tagged variant that selects one at runtime.

pub mod memory;
pub mod sqlite;

use crate::config::BackendConfig;
use crate::log::{BackendError, Delta, StorageBackend};
use crate::state::{Record, RecordId, Version};

use memory::MemoryBackend;
use sqlite::SqliteBackend;

/// Backend chosen from configuration.
#[derive(Debug)]
pub enum Backend {
    Memory(MemoryBackend),
    Sqlite(SqliteBackend),
}

impl Backend {
    pub fn open(config: &BackendConfig) -> Result<Self, BackendError> {
        Ok(match config {
            BackendConfig::Volatile => Self::Memory(MemoryBackend::volatile()),
            BackendConfig::History => Self::Memory(MemoryBackend::with_history()),
            BackendConfig::Sqlite {
                path,
                reset_on_start,
            } => Self::Sqlite(SqliteBackend::open(path, *reset_on_start)?),
        })
    }
}

macro_rules! dispatch {
    ($self:expr, $backend:ident => $call:expr) => {
        match $self {
            Backend::Memory($backend) => $call,
            Backend::Sqlite($backend) => $call,
        }
    };
}

impl StorageBackend for Backend {
    fn keeps_history(&self) -> bool {
        dispatch!(self, b => b.keeps_history())
    }

    fn load_snapshot(&self, id: RecordId) -> Result<Option<Record>, BackendError> {
        dispatch!(self, b => b.load_snapshot(id))
    }

    fn store_snapshot(&mut self, record: &Record) -> Result<(), BackendError> {
        dispatch!(self, b => b.store_snapshot(record))
    }

    fn insert_delta(&mut self, delta: &Delta) -> Result<(), BackendError> {
        dispatch!(self, b => b.insert_delta(delta))
    }

    fn query_deltas(&self, id: RecordId, min_version: Version) -> Result<Vec<Delta>, BackendError> {
        dispatch!(self, b => b.query_deltas(id, min_version))
    }

    fn try_create(&mut self, record: &Record) -> Result<(), BackendError> {
        dispatch!(self, b => b.try_create(record))
    }

    fn commit_update(&mut self, snapshot: &Record, delta: &Delta) -> Result<(), BackendError> {
        dispatch!(self, b => b.commit_update(snapshot, delta))
    }
}
