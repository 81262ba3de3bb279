// Record State & Delta Engine
//
// Forward updates and their minimal inverses over a record's field map.
// This module is pure, deterministic, and side-effect free.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Version of a record. The first committed state is version 1.
pub type Version = u64;

/// Field map of a record.
pub type Data = BTreeMap<String, String>;

/// Caller-supplied mutation: `Some` sets a key, `None` deletes it.
pub type Update = BTreeMap<String, Option<String>>;

/// Stable identifier for a record.
///
/// Only strictly positive ids are addressable; the store rejects the rest
/// before touching a backend.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RecordId(pub i64);

impl RecordId {
    pub fn is_valid(self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub version: Version,
    pub data: Data,
}

/// Legacy view of a record without version information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordV1 {
    pub id: RecordId,
    pub data: Data,
}

impl Record {
    /// A freshly created record at version 1.
    pub fn new(id: RecordId, data: Data) -> Self {
        Self {
            id,
            version: 1,
            data,
        }
    }

    /// Apply `update` in place.
    ///
    /// Returns whether any key's presence or value differs from the state
    /// before the call. Each key is compared against its own pre-mutation
    /// value, so the result gates version bumps exactly.
    pub fn apply_update(&mut self, update: &Update) -> bool {
        let mut changed = false;

        for (key, value) in update {
            let previous = match value {
                Some(value) => self.data.insert(key.clone(), value.clone()),
                None => self.data.remove(key),
            };
            changed |= previous.as_ref() != value.as_ref();
        }

        changed
    }

    /// Compute the update that undoes `update` once it has been applied.
    ///
    /// Must be called on the pre-mutation record. Keys that `update` would
    /// leave untouched are omitted, which keeps delta rows minimal.
    pub fn inverse_update(&self, update: &Update) -> Update {
        update
            .iter()
            .filter_map(|(key, value)| {
                let current = self.data.get(key);
                if current == value.as_ref() {
                    None
                } else {
                    Some((key.clone(), current.cloned()))
                }
            })
            .collect()
    }

    pub fn into_v1(self) -> RecordV1 {
        RecordV1 {
            id: self.id,
            data: self.data,
        }
    }
}

/// Initial data for a record created from an update: deletions are dropped.
pub fn data_from_update(update: &Update) -> Data {
    update
        .iter()
        .filter_map(|(key, value)| value.as_ref().map(|v| (key.clone(), v.clone())))
        .collect()
}
