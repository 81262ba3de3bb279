// In-Memory Backend
//
// Snapshots in a hash map, with an optional delta log. Without the
// log the backend is volatile and history-less.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::log::{BackendError, Delta, DeltaLog, StorageBackend};
use crate::state::{Record, RecordId, Version};

#[derive(Debug, Default)]
pub struct MemoryBackend {
    snapshots: HashMap<RecordId, Record>,
    history: Option<DeltaLog>,
}

impl MemoryBackend {
    /// Latest snapshots only; past versions are discarded.
    pub fn volatile() -> Self {
        Self::default()
    }

    /// Keeps every inverse delta, so past versions can be replayed.
    pub fn with_history() -> Self {
        Self {
            snapshots: HashMap::new(),
            history: Some(DeltaLog::new()),
        }
    }
}

impl StorageBackend for MemoryBackend {
    fn keeps_history(&self) -> bool {
        self.history.is_some()
    }

    fn load_snapshot(&self, id: RecordId) -> Result<Option<Record>, BackendError> {
        Ok(self.snapshots.get(&id).cloned())
    }

    fn store_snapshot(&mut self, record: &Record) -> Result<(), BackendError> {
        self.snapshots.insert(record.id, record.clone());
        Ok(())
    }

    fn insert_delta(&mut self, delta: &Delta) -> Result<(), BackendError> {
        if let Some(log) = self.history.as_mut() {
            log.append(delta.clone())?;
        }
        Ok(())
    }

    fn query_deltas(&self, id: RecordId, min_version: Version) -> Result<Vec<Delta>, BackendError> {
        Ok(self
            .history
            .as_ref()
            .map(|log| log.query(id, min_version))
            .unwrap_or_default())
    }

    fn try_create(&mut self, record: &Record) -> Result<(), BackendError> {
        match self.snapshots.entry(record.id) {
            Entry::Occupied(_) => Err(BackendError::AlreadyExists(record.id)),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(())
            }
        }
    }

    fn commit_update(&mut self, snapshot: &Record, delta: &Delta) -> Result<(), BackendError> {
        // Delta first: a rejected row leaves the snapshot untouched.
        self.insert_delta(delta)?;
        self.store_snapshot(snapshot)
    }
}
