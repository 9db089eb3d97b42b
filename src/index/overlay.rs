//! In-memory overlay of index records modified inside a transaction.
//!
//! Repeated rewrites of the same index record during a multi-operation
//! transaction collapse into a single entry here; only the final list
//! reaches the backing store at commit. Keyed by the linearised index
//! record name.

use crate::index::dn_list::DnList;
use rustc_hash::FxHashMap;

#[derive(Debug, Default)]
pub struct TxOverlay {
    entries: FxHashMap<Vec<u8>, DnList>,
}

impl TxOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn get(&self, index_dn: &[u8]) -> Option<&DnList> {
        self.entries.get(index_dn)
    }

    /// Install or replace the staged list for an index record.
    pub(crate) fn insert(&mut self, index_dn: Vec<u8>, list: DnList) {
        self.entries.insert(index_dn, list);
    }

    /// Drain for commit. Iteration order is unspecified.
    pub(crate) fn into_entries(self) -> Vec<(Vec<u8>, DnList)> {
        self.entries.into_iter().collect()
    }
}
