//! Purpose: Observer-side view of the last received snapshot.
//! Exports: `ClientCache`.
//! Role: Whole-map replace on every snapshot; readers never see a mix of
//! two generations.
//! Invariants: Lookup returns record-or-absent, never a default record.
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use uuid::Uuid;

use crate::core::record::StatRecord;

#[derive(Default)]
pub struct ClientCache {
    inner: RwLock<HashMap<Uuid, StatRecord>>,
}

impl ClientCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the entire view with one received snapshot. Never merges:
    /// ids absent from `entries` are gone after this returns.
    pub fn apply(&self, entries: BTreeMap<Uuid, StatRecord>) {
        let next: HashMap<Uuid, StatRecord> = entries.into_iter().collect();
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = next;
    }

    pub fn get(&self, id: &Uuid) -> Option<StatRecord> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
