// src/participants/mod.rs

//! Participant registry: one monotonically growing "next session number" per
//! participant name, persisted through a [`ParticipantStore`] and broadcast
//! on the `participants` topic.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::json;
use tracing::{debug, warn};

use crate::broadcast::UpdateBroadcaster;
use crate::errors::{Result, SessionError};
use crate::types::{Participant, PARTICIPANT_NAME_PATTERN};

mod store;

pub use store::{JsonFileStore, MemoryStore, ParticipantStore};

struct Inner {
    participants: BTreeMap<String, Participant>,
    store: Box<dyn ParticipantStore>,
}

/// Clonable registry handle; all clones share one record map.
#[derive(Clone)]
pub struct ParticipantRegistry {
    inner: Arc<Mutex<Inner>>,
    updates: UpdateBroadcaster,
}

impl ParticipantRegistry {
    /// Load persisted records, merge in bounds discovered from historical
    /// data files, then broadcast one full `participants` snapshot.
    pub fn new(
        store: Box<dyn ParticipantStore>,
        data_dir: &Path,
        updates: UpdateBroadcaster,
    ) -> Self {
        let mut participants = match store.load() {
            Ok(map) => map,
            Err(err) => {
                warn!(error = %err, "could not load participant records; starting empty");
                BTreeMap::new()
            }
        };

        // A completed session leaves a `<name>_<...>.psydat` marker behind;
        // the next unused session number is therefore count + 1. Loaded
        // values only ever grow from this.
        for (name, next_session) in scan_session_markers(data_dir) {
            participants
                .entry(name.clone())
                .or_insert_with(|| Participant::new(&name, 1))
                .update(next_session);
        }

        let registry = Self {
            inner: Arc::new(Mutex::new(Inner {
                participants,
                store,
            })),
            updates,
        };
        registry
            .updates
            .broadcast("participants", json!(registry.snapshot()));
        registry
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Advance (never decrease) the next session number of `name`, creating
    /// the record when missing.
    ///
    /// On an actual change the full map is persisted and one incremental
    /// `participants` delta is broadcast.
    pub fn set_session(&self, name: &str, session: i64) -> Result<()> {
        if !PARTICIPANT_NAME_PATTERN.is_match(name) {
            return Err(SessionError::InvalidParticipantName(name.to_string()));
        }
        if session < 1 {
            return Err(SessionError::InvalidSession(session.to_string()));
        }

        let mut inner = self.lock();
        let changed = match inner.participants.get_mut(name) {
            Some(participant) => participant.update(session),
            None => {
                inner
                    .participants
                    .insert(name.to_string(), Participant::new(name, session));
                true
            }
        };
        if !changed {
            return Ok(());
        }

        debug!(name, session, "participant session advanced");
        let Inner {
            participants,
            store,
        } = &mut *inner;
        store.save(participants).map_err(SessionError::Other)?;

        let record = json!(participants[name]);
        drop(inner);
        self.updates.broadcast_entry("participants", name, record);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Participant> {
        self.lock()
            .participants
            .get(name)
            .cloned()
            .ok_or_else(|| SessionError::ParticipantNotFound(name.to_string()))
    }

    pub fn snapshot(&self) -> BTreeMap<String, Participant> {
        self.lock().participants.clone()
    }
}

/// Walk the historical data root for `*.psydat` session markers, grouped by
/// the participant-name prefix before the first `_`.
fn scan_session_markers(data_dir: &Path) -> BTreeMap<String, i64> {
    let mut counts: BTreeMap<String, i64> = BTreeMap::new();
    let mut pending = vec![data_dir.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            // Typically the data dir simply does not exist yet.
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some("psydat") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            // Name validation forbids '_' in participant names, so the
            // prefix before the first '_' is unambiguous.
            let name = stem.split('_').next().unwrap_or(stem);
            *counts.entry(name.to_string()).or_insert(1) += 1;
        }
    }

    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn registry(data_dir: &Path) -> (ParticipantRegistry, UpdateBroadcaster) {
        let updates = UpdateBroadcaster::new();
        let registry = ParticipantRegistry::new(
            Box::new(MemoryStore::new()),
            data_dir,
            updates.clone(),
        );
        (registry, updates)
    }

    #[test]
    fn set_session_never_decreases() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, _updates) = registry(dir.path());

        registry.set_session("Lolo", 1).unwrap();
        registry.set_session("Lolo", 3).unwrap();
        registry.set_session("Lolo", 2).unwrap();
        assert_eq!(registry.get("Lolo").unwrap().next_session, 3);
    }

    #[test]
    fn rejects_invalid_input() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, _updates) = registry(dir.path());

        let err = registry.set_session("nope_nope", 1).unwrap_err();
        assert!(matches!(err, SessionError::InvalidParticipantName(_)));
        let err = registry.set_session("ok", 0).unwrap_err();
        assert!(matches!(err, SessionError::InvalidSession(_)));
        assert!(matches!(
            registry.get("missing").unwrap_err(),
            SessionError::ParticipantNotFound(_)
        ));
    }

    #[test]
    fn discovers_sessions_from_data_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        for f in ["Lolo_1.psydat", "Lolo_2.psydat", "sub/Momo_1.psydat"] {
            fs::write(dir.path().join(f), b"").unwrap();
        }
        fs::write(dir.path().join("notes.txt"), b"").unwrap();

        let (registry, _updates) = registry(dir.path());
        assert_eq!(registry.get("Lolo").unwrap().next_session, 3);
        assert_eq!(registry.get("Momo").unwrap().next_session, 2);
    }

    #[test]
    fn data_scan_never_decreases_loaded_records() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Lolo_1.psydat"), b"").unwrap();

        let mut records = BTreeMap::new();
        records.insert("Lolo".to_string(), Participant::new("Lolo", 9));
        let updates = UpdateBroadcaster::new();
        let registry = ParticipantRegistry::new(
            Box::new(MemoryStore::with_records(records)),
            dir.path(),
            updates,
        );
        assert_eq!(registry.get("Lolo").unwrap().next_session, 9);
    }

    #[tokio::test]
    async fn broadcasts_snapshot_then_deltas() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Lolo_1.psydat"), b"").unwrap();
        let (registry, updates) = registry(dir.path());

        let mut sub = updates.updates();
        let snapshot = sub.next().await.unwrap();
        assert_eq!(snapshot.kind, "participantsUpdate");
        assert_eq!(
            snapshot.data,
            json!({"Lolo": {"name": "Lolo", "nextSession": 2}})
        );

        registry.set_session("Momo", 4).unwrap();
        let delta = sub.next().await.unwrap();
        assert_eq!(
            delta.data,
            json!({"Momo": {"name": "Momo", "nextSession": 4}})
        );

        // No change, no broadcast: the next event is an unrelated probe.
        registry.set_session("Momo", 4).unwrap();
        registry.updates.broadcast("probe", json!(1));
        assert_eq!(sub.next().await.unwrap().kind, "probeUpdate");
    }
}
