//! Process-local reservation store. Entries are keyed by reservation id
//! and index; readers on the data plane take shared locks, the
//! orchestrator takes exclusive locks. State is reconstructible from
//! observed responses, so nothing is persisted.

use crate::packet::block::Block;
use crate::types::{BwCls, FailCode, Index, ResvId, State, Tick};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Source-side bookkeeping for the ephemeral flow riding a steady
/// entry.
#[derive(Clone, Debug)]
pub struct EphemMeta {
    pub last_fail_code: FailCode,
    pub last_max_bw: BwCls,
    pub updated_nanos: u64,
}

impl Default for EphemMeta {
    fn default() -> Self {
        EphemMeta {
            last_fail_code: FailCode::None,
            last_max_bw: BwCls(0),
            updated_nanos: 0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ResvEntry {
    pub id: ResvId,
    pub idx: Index,
    pub state: State,
    /// Canonical block in Reservation form (authenticators decrypted).
    pub block: Block,
    pub creation_nanos: u64,
    pub min_bw: BwCls,
    pub max_bw: BwCls,
    pub ephem_meta: EphemMeta,
}

impl ResvEntry {
    pub fn exp_tick(&self) -> Tick {
        self.block.info.exp_tick
    }
}

#[derive(Default)]
pub struct ResvStore {
    inner: RwLock<HashMap<(ResvId, Index), Arc<RwLock<ResvEntry>>>>,
}

impl ResvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, entry: ResvEntry) -> Arc<RwLock<ResvEntry>> {
        let key = (entry.id, entry.idx);
        let entry = Arc::new(RwLock::new(entry));
        self.inner
            .write()
            .expect("store poisoned")
            .insert(key, entry.clone());
        entry
    }

    pub fn get(&self, id: &ResvId, idx: Index) -> Option<Arc<RwLock<ResvEntry>>> {
        self.inner
            .read()
            .expect("store poisoned")
            .get(&(*id, idx))
            .cloned()
    }

    pub fn remove(&self, id: &ResvId, idx: Index) -> Option<Arc<RwLock<ResvEntry>>> {
        self.inner
            .write()
            .expect("store poisoned")
            .remove(&(*id, idx))
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("store poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry whose expiration tick lies in the past.
    /// Returns how many were removed.
    pub fn expire(&self, now_nanos: u64) -> usize {
        let mut map = self.inner.write().expect("store poisoned");
        let before = map.len();
        map.retain(|_, entry| {
            entry.read().expect("entry poisoned").exp_tick().nanos() > now_nanos
        });
        before - map.len()
    }
}
