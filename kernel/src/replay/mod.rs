// History Replay Engine
//
// Rewinds a record from its latest snapshot by applying inverse
// deltas, most recent first. Pure: all I/O happens in the caller.

use crate::log::Delta;
use crate::state::{Record, RecordId, Version};

/// Errors that can occur during replay.
///
/// Every variant means the delta rows handed in do not describe a
/// contiguous history of the record.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ReplayError {
    #[error("delta for record {found} cannot be replayed onto record {expected}")]
    ForeignDelta { expected: RecordId, found: RecordId },

    #[error("delta log gap for record {id}: expected delta before version {expected}, got {actual}")]
    Gap {
        id: RecordId,
        expected: Version,
        actual: Version,
    },

    #[error("history of record {id} stops at version {reached}, target was {target}")]
    Truncated {
        id: RecordId,
        reached: Version,
        target: Version,
    },
}

/// Reconstruct the record as it was right after reaching `target`.
///
/// `deltas` must be ordered by `version_before_delta` descending; rows
/// older than `target` are ignored.
pub fn replay_to_version(
    latest: Record,
    deltas: &[Delta],
    target: Version,
) -> Result<Record, ReplayError> {
    let mut working = latest;

    for delta in deltas {
        if working.version <= target {
            break;
        }
        rewind(&mut working, delta)?;
    }

    if working.version != target {
        return Err(ReplayError::Truncated {
            id: working.id,
            reached: working.version,
            target,
        });
    }

    Ok(working)
}

/// Reconstruct every version of the record, oldest first.
///
/// `deltas` must cover `version_before_delta` 1 through `latest.version - 1`,
/// ordered descending.
pub fn replay_all(latest: Record, deltas: &[Delta]) -> Result<Vec<Record>, ReplayError> {
    let mut history = Vec::with_capacity(deltas.len() + 1);
    let mut working = latest.clone();
    history.push(latest);

    for delta in deltas {
        if working.version <= 1 {
            break;
        }
        rewind(&mut working, delta)?;
        history.push(working.clone());
    }

    if working.version != 1 {
        return Err(ReplayError::Truncated {
            id: working.id,
            reached: working.version,
            target: 1,
        });
    }

    history.reverse();
    Ok(history)
}

fn rewind(working: &mut Record, delta: &Delta) -> Result<(), ReplayError> {
    if delta.id != working.id {
        return Err(ReplayError::ForeignDelta {
            expected: working.id,
            found: delta.id,
        });
    }

    let expected = working.version.saturating_sub(1);
    if delta.version_before_delta != expected {
        return Err(ReplayError::Gap {
            id: working.id,
            expected,
            actual: delta.version_before_delta,
        });
    }

    working.apply_update(&delta.inverse_update);
    working.version = delta.version_before_delta;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Data, Update};

    fn data(pairs: &[(&str, &str)]) -> Data {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn update(pairs: &[(&str, Option<&str>)]) -> Update {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.map(str::to_string)))
            .collect()
    }

    /// Builds a record through `updates`, returning the latest state, the
    /// descending delta rows and every intermediate snapshot.
    fn history(updates: &[Update]) -> (Record, Vec<Delta>, Vec<Record>) {
        let mut record = Record::new(RecordId(3), Data::new());
        let mut snapshots = vec![record.clone()];
        let mut deltas = Vec::new();

        for u in updates {
            let inverse = record.inverse_update(u);
            assert!(record.apply_update(u));
            deltas.push(Delta {
                id: record.id,
                version_before_delta: record.version,
                inverse_update: inverse,
            });
            record.version += 1;
            snapshots.push(record.clone());
        }

        deltas.reverse();
        (record, deltas, snapshots)
    }

    fn sample() -> (Record, Vec<Delta>, Vec<Record>) {
        history(&[
            update(&[("hello", Some("world")), ("stable", Some("data"))]),
            update(&[("hello", None), ("goodbye", Some("world"))]),
            update(&[("goodbye", Some("moon"))]),
        ])
    }

    #[test]
    fn replay_reaches_every_version() {
        let (latest, deltas, snapshots) = sample();

        for expected in &snapshots {
            let replayed = replay_to_version(latest.clone(), &deltas, expected.version).unwrap();
            assert_eq!(&replayed, expected);
        }
    }

    #[test]
    fn replay_ignores_rows_older_than_target() {
        let (latest, deltas, snapshots) = sample();

        let replayed = replay_to_version(latest, &deltas, 3).unwrap();

        assert_eq!(replayed, snapshots[2]);
        assert_eq!(replayed.data, data(&[("stable", "data"), ("goodbye", "world")]));
    }

    #[test]
    fn replay_all_is_oldest_first() {
        let (latest, deltas, snapshots) = sample();

        let all = replay_all(latest, &deltas).unwrap();

        assert_eq!(all, snapshots);
    }

    #[test]
    fn gap_in_history_is_detected() {
        let (latest, mut deltas, _) = sample();
        deltas.remove(1);

        let err = replay_all(latest, &deltas).unwrap_err();

        assert_eq!(
            err,
            ReplayError::Gap {
                id: RecordId(3),
                expected: 2,
                actual: 1,
            }
        );
    }

    #[test]
    fn missing_tail_is_truncation() {
        let (latest, mut deltas, _) = sample();
        deltas.pop();

        let err = replay_to_version(latest, &deltas, 1).unwrap_err();

        assert!(matches!(err, ReplayError::Truncated { reached: 2, target: 1, .. }));
    }

    #[test]
    fn foreign_rows_are_rejected() {
        let (latest, mut deltas, _) = sample();
        deltas[0].id = RecordId(99);

        let err = replay_to_version(latest, &deltas, 1).unwrap_err();

        assert!(matches!(err, ReplayError::ForeignDelta { .. }));
    }

    #[test]
    fn huge_version_with_short_history_is_truncation() {
        let (mut latest, _, _) = sample();
        latest.version = Version::MAX;

        let err = replay_all(latest, &[]).unwrap_err();

        assert!(matches!(err, ReplayError::Truncated { reached: Version::MAX, target: 1, .. }));
    }
}
