// Shared in-memory record store. One lock, short critical sections; every
// mutation is a whole-record replace so readers never see a half-merged
// entry. File I/O never happens while the lock is held.
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use uuid::Uuid;

use crate::core::record::StatRecord;

/// Immutable id → record mapping taken at one publish instant. Replaced
/// wholesale on the next cycle, never mutated. Ordered so downstream
/// encoding is deterministic.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Snapshot {
    entries: BTreeMap<Uuid, StatRecord>,
}

impl Snapshot {
    pub fn new(entries: BTreeMap<Uuid, StatRecord>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &BTreeMap<Uuid, StatRecord> {
        &self.entries
    }

    pub fn get(&self, id: &Uuid) -> Option<&StatRecord> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Clone, Default)]
pub struct StatStore {
    inner: Arc<RwLock<HashMap<Uuid, StatRecord>>>,
}

impl StatStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &Uuid) -> Option<StatRecord> {
        self.read().get(id).cloned()
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.read().keys().copied().collect()
    }

    /// Atomic single-entity replace.
    pub fn replace(&self, id: Uuid, record: StatRecord) {
        self.write().insert(id, record);
    }

    /// Atomic in-place update; returns false when the id is absent.
    pub fn update(&self, id: &Uuid, apply: impl FnOnce(&mut StatRecord)) -> bool {
        let mut guard = self.write();
        match guard.get_mut(id) {
            Some(record) => {
                apply(record);
                true
            }
            None => false,
        }
    }

    /// Atomic create-or-update: `seed` is inserted first when the id is
    /// absent, then `apply` runs against the stored record either way.
    pub fn upsert(&self, id: Uuid, seed: StatRecord, apply: impl FnOnce(&mut StatRecord)) {
        let mut guard = self.write();
        let record = guard.entry(id).or_insert(seed);
        apply(record);
    }

    pub fn retain(&self, mut keep: impl FnMut(&Uuid, &StatRecord) -> bool) -> usize {
        let mut guard = self.write();
        let before = guard.len();
        guard.retain(|id, record| keep(id, record));
        before - guard.len()
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    pub fn snapshot(&self) -> Snapshot {
        let guard = self.read();
        let entries = guard
            .iter()
            .map(|(id, record)| (*id, record.clone()))
            .collect();
        Snapshot::new(entries)
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<Uuid, StatRecord>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, StatRecord>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}
