// Inverse Delta Log
//
// One immutable row per committed mutation. Rows for a record are
// append-only and keyed by the version they restore.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::state::{RecordId, Update, Version};

pub mod store;

pub use store::{BackendError, StorageBackend};

/// The update that rewinds a record from `version_before_delta + 1`
/// back to `version_before_delta`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    pub id: RecordId,
    pub version_before_delta: Version,
    pub inverse_update: Update,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LogError {
    #[error("version conflict for record {id}: expected {expected}, got {actual}")]
    VersionConflict {
        id: RecordId,
        expected: Version,
        actual: Version,
    },
}

/// In-memory delta log, one ordered vector per record.
///
/// Row `i` of a record's vector always has `version_before_delta == i + 1`.
#[derive(Debug, Default, Clone)]
pub struct DeltaLog {
    deltas: BTreeMap<RecordId, Vec<Delta>>,
}

impl DeltaLog {
    pub fn new() -> Self {
        Self {
            deltas: BTreeMap::new(),
        }
    }

    pub fn append(&mut self, delta: Delta) -> Result<(), LogError> {
        let rows = self.deltas.entry(delta.id).or_default();
        let expected = rows.len() as Version + 1;

        if delta.version_before_delta != expected {
            return Err(LogError::VersionConflict {
                id: delta.id,
                expected,
                actual: delta.version_before_delta,
            });
        }

        rows.push(delta);
        Ok(())
    }

    /// Rows with `version_before_delta >= min_version`, most recent first.
    pub fn query(&self, id: RecordId, min_version: Version) -> Vec<Delta> {
        let Some(rows) = self.deltas.get(&id) else {
            return Vec::new();
        };

        let start = (min_version.saturating_sub(1) as usize).min(rows.len());
        rows[start..].iter().rev().cloned().collect()
    }

    /// Highest `version_before_delta` recorded for `id`, or 0.
    pub fn head(&self, id: RecordId) -> Version {
        self.deltas
            .get(&id)
            .map(|rows| rows.len() as Version)
            .unwrap_or(0)
    }
}
