// Versioned Record Store
//
// Orchestrates create / update / read operations over a storage
// backend. Mutations hold the write lock across their whole
// read-decide-write sequence; reads share the read lock.

use tracing::{debug, info, warn};

use crate::guard::ConcurrencyGuard;
use crate::log::{BackendError, Delta, StorageBackend};
use crate::replay::{replay_all, replay_to_version, ReplayError};
use crate::state::{data_from_update, Data, Record, RecordId, Update, Version};

/// Failures that are not the caller's fault.
#[derive(Debug, thiserror::Error)]
pub enum InternalError {
    #[error("backend failure: {0}")]
    Backend(#[from] BackendError),

    #[error("replay failure: {0}")]
    Replay(#[from] ReplayError),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid record id {0}; id must be a positive number")]
    InvalidId(i64),

    #[error("record {0} already exists")]
    AlreadyExists(RecordId),

    #[error("record {0} does not exist")]
    NotFound(RecordId),

    #[error("record {id} has no version {version}")]
    VersionNotFound { id: RecordId, version: Version },

    #[error("internal error: {0}")]
    Internal(#[from] InternalError),
}

impl StoreError {
    /// True for both a missing record and a missing version of one.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::VersionNotFound { .. })
    }
}

fn internal(err: impl Into<InternalError>) -> StoreError {
    let err = err.into();
    warn!(error = %err, "versioned_store: internal failure");
    StoreError::Internal(err)
}

fn validate(id: RecordId) -> Result<(), StoreError> {
    if id.is_valid() {
        Ok(())
    } else {
        Err(StoreError::InvalidId(id.0))
    }
}

/// Record store with full mutation history.
///
/// Every returned [`Record`] is an owned copy; mutating it never affects
/// stored state.
#[derive(Debug)]
pub struct VersionedStore<B> {
    guard: ConcurrencyGuard<B>,
}

impl<B: StorageBackend> VersionedStore<B> {
    pub fn new(backend: B) -> Self {
        Self {
            guard: ConcurrencyGuard::new(backend),
        }
    }

    pub fn keeps_history(&self) -> bool {
        self.guard.read(|backend| backend.keeps_history())
    }

    /// Read-only access to the backend under the shared lock.
    pub fn inspect<R>(&self, f: impl FnOnce(&B) -> R) -> R {
        self.guard.read(f)
    }

    pub fn into_backend(self) -> B {
        self.guard.into_inner()
    }

    /// Create a record at version 1. No delta row is written.
    pub fn create_record(&self, id: RecordId, data: Data) -> Result<Record, StoreError> {
        validate(id)?;
        self.guard.write(|backend| create(backend, Record::new(id, data)))
    }

    /// Apply `update` to an existing record.
    ///
    /// A no-op update returns the current record and writes nothing.
    pub fn update_record(&self, id: RecordId, update: &Update) -> Result<Record, StoreError> {
        validate(id)?;
        self.guard.write(|backend| {
            let current = load(&*backend, id)?.ok_or(StoreError::NotFound(id))?;
            apply(backend, current, update)
        })
    }

    /// Update the record if it exists, otherwise create it from the
    /// non-deleting entries of `update`.
    ///
    /// The existence check and the write happen under one write lock, so
    /// two racing upserts of a new id create it exactly once.
    pub fn upsert_record(&self, id: RecordId, update: &Update) -> Result<Record, StoreError> {
        validate(id)?;
        self.guard.write(|backend| match load(&*backend, id)? {
            Some(current) => apply(backend, current, update),
            None => create(backend, Record::new(id, data_from_update(update))),
        })
    }

    pub fn get_latest(&self, id: RecordId) -> Result<Record, StoreError> {
        validate(id)?;
        self.guard
            .read(|backend| load(backend, id)?.ok_or(StoreError::NotFound(id)))
    }

    /// Fetch the record as it was at `version`; 0 means latest.
    pub fn get_version(&self, id: RecordId, version: Version) -> Result<Record, StoreError> {
        validate(id)?;
        self.guard.read(|backend| {
            let latest = load(backend, id)?.ok_or(StoreError::NotFound(id))?;
            let target = if version == 0 { latest.version } else { version };

            if target > latest.version {
                return Err(StoreError::VersionNotFound { id, version });
            }
            if target == latest.version {
                return Ok(latest);
            }
            if !backend.keeps_history() {
                debug!(%id, version, "versioned_store: backend keeps no history");
                return Err(StoreError::VersionNotFound { id, version });
            }

            let deltas = backend.query_deltas(id, target).map_err(internal)?;
            debug!(
                %id,
                from = latest.version,
                to = target,
                deltas = deltas.len(),
                "versioned_store: replaying"
            );
            replay_to_version(latest, &deltas, target).map_err(internal)
        })
    }

    /// Every version of the record, oldest first.
    ///
    /// Backends without history yield only the latest version.
    pub fn get_all_versions(&self, id: RecordId) -> Result<Vec<Record>, StoreError> {
        validate(id)?;
        self.guard.read(|backend| {
            let latest = load(backend, id)?.ok_or(StoreError::NotFound(id))?;

            if latest.version == 1 || !backend.keeps_history() {
                return Ok(vec![latest]);
            }

            let deltas = backend.query_deltas(id, 1).map_err(internal)?;
            debug!(
                %id,
                latest = latest.version,
                deltas = deltas.len(),
                "versioned_store: replaying full history"
            );
            replay_all(latest, &deltas).map_err(internal)
        })
    }
}

fn load<B: StorageBackend>(backend: &B, id: RecordId) -> Result<Option<Record>, StoreError> {
    backend.load_snapshot(id).map_err(internal)
}

fn create<B: StorageBackend>(backend: &mut B, record: Record) -> Result<Record, StoreError> {
    match backend.try_create(&record) {
        Ok(()) => {
            info!(id = %record.id, "versioned_store: record created");
            Ok(record)
        }
        Err(BackendError::AlreadyExists(id)) => Err(StoreError::AlreadyExists(id)),
        Err(err) => Err(internal(err)),
    }
}

fn apply<B: StorageBackend>(
    backend: &mut B,
    current: Record,
    update: &Update,
) -> Result<Record, StoreError> {
    let inverse_update = current.inverse_update(update);
    let mut next = current.clone();

    if !next.apply_update(update) {
        debug!(id = %current.id, version = current.version, "versioned_store: no-op update");
        return Ok(current);
    }

    let delta = Delta {
        id: current.id,
        version_before_delta: current.version,
        inverse_update,
    };
    next.version += 1;

    backend.commit_update(&next, &delta).map_err(internal)?;
    info!(id = %next.id, version = next.version, "versioned_store: record updated");
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MemoryBackend;

    fn update(pairs: &[(&str, Option<&str>)]) -> Update {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.map(str::to_string)))
            .collect()
    }

    fn data(pairs: &[(&str, &str)]) -> Data {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn store() -> VersionedStore<MemoryBackend> {
        VersionedStore::new(MemoryBackend::with_history())
    }

    #[test]
    fn non_positive_ids_are_rejected() {
        let store = store();

        for raw in [0, -1, i64::MIN] {
            let id = RecordId(raw);
            assert!(matches!(store.create_record(id, Data::new()), Err(StoreError::InvalidId(r)) if r == raw));
            assert!(matches!(store.update_record(id, &Update::new()), Err(StoreError::InvalidId(_))));
            assert!(matches!(store.upsert_record(id, &Update::new()), Err(StoreError::InvalidId(_))));
            assert!(matches!(store.get_latest(id), Err(StoreError::InvalidId(_))));
            assert!(matches!(store.get_version(id, 1), Err(StoreError::InvalidId(_))));
            assert!(matches!(store.get_all_versions(id), Err(StoreError::InvalidId(_))));
        }
    }

    #[test]
    fn duplicate_create_fails_without_touching_data() {
        let store = store();
        let id = RecordId(42);
        store.create_record(id, data(&[("hello", "world")])).unwrap();

        let err = store.create_record(id, data(&[("other", "value")])).unwrap_err();

        assert!(matches!(err, StoreError::AlreadyExists(RecordId(42))));
        assert_eq!(store.get_latest(id).unwrap().data, data(&[("hello", "world")]));
    }

    #[test]
    fn missing_records_are_not_found() {
        let store = store();
        let id = RecordId(5);

        assert!(matches!(store.get_latest(id), Err(StoreError::NotFound(_))));
        assert!(matches!(store.update_record(id, &update(&[("a", Some("b"))])), Err(StoreError::NotFound(_))));
        assert!(store.get_version(id, 0).unwrap_err().is_not_found());
        assert!(store.get_all_versions(id).unwrap_err().is_not_found());
    }

    #[test]
    fn noop_update_keeps_version_and_writes_no_delta() {
        let store = store();
        let id = RecordId(8);
        store.create_record(id, data(&[("a", "1")])).unwrap();

        let record = store
            .update_record(id, &update(&[("a", Some("1")), ("missing", None)]))
            .unwrap();

        assert_eq!(record.version, 1);
        assert!(store.inspect(|b| b.query_deltas(id, 0).unwrap()).is_empty());
    }

    #[test]
    fn each_real_update_bumps_version_by_one() {
        let store = store();
        let id = RecordId(11);
        store.create_record(id, Data::new()).unwrap();

        for n in 1..=5u64 {
            let value = n.to_string();
            let record = store
                .update_record(id, &update(&[("counter", Some(value.as_str()))]))
                .unwrap();
            assert_eq!(record.version, n + 1);

            store.update_record(id, &update(&[("counter", Some(value.as_str()))])).unwrap();
            assert_eq!(store.get_latest(id).unwrap().version, n + 1);
        }
    }

    #[test]
    fn version_bounds() {
        let store = store();
        let id = RecordId(2);
        store.create_record(id, Data::new()).unwrap();
        store.update_record(id, &update(&[("k", Some("v"))])).unwrap();

        assert_eq!(store.get_version(id, 0).unwrap(), store.get_latest(id).unwrap());
        assert!(matches!(
            store.get_version(id, 3),
            Err(StoreError::VersionNotFound { version: 3, .. })
        ));
        assert_eq!(store.get_version(id, 1).unwrap().data, Data::new());
    }

    #[test]
    fn upsert_creates_then_updates() {
        let store = store();
        let id = RecordId(77);

        let created = store
            .upsert_record(id, &update(&[("a", Some("1")), ("gone", None)]))
            .unwrap();
        assert_eq!(created, Record::new(id, data(&[("a", "1")])));

        let updated = store.upsert_record(id, &update(&[("a", None)])).unwrap();
        assert_eq!(updated.version, 2);
        assert!(updated.data.is_empty());
        assert_eq!(store.get_version(id, 1).unwrap().data, data(&[("a", "1")]));
    }

    #[test]
    fn returned_records_are_copies() {
        let store = store();
        let id = RecordId(4);
        let mut record = store.create_record(id, data(&[("a", "1")])).unwrap();

        record.data.insert("b".into(), "2".into());
        record.version = 99;

        assert_eq!(store.get_latest(id).unwrap(), Record::new(id, data(&[("a", "1")])));
    }

    #[test]
    fn volatile_backend_serves_latest_only() {
        let store = VersionedStore::new(MemoryBackend::volatile());
        let id = RecordId(6);
        store.create_record(id, data(&[("a", "1")])).unwrap();
        let latest = store.update_record(id, &update(&[("a", Some("2"))])).unwrap();

        assert!(!store.keeps_history());
        assert_eq!(latest.version, 2);
        assert_eq!(store.get_version(id, 2).unwrap(), latest);
        assert!(store.get_version(id, 1).unwrap_err().is_not_found());
        assert_eq!(store.get_all_versions(id).unwrap(), vec![latest]);
    }
}
