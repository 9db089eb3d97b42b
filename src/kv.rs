//! Backing key/value store interface.
//!
//! The engine runs against any ordered byte-key store that can get,
//! put, delete and iterate in lexicographic key order. `MemoryKv` is
//! the reference implementation used by the test suites.

use faro_types::{FaroError, Result};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutMode {
    /// Fail if the key already exists.
    Insert,
    /// Overwrite any existing value.
    Replace,
}

/// Traversal callback for [`KvStore::iterate`]. Returning an error
/// aborts the walk and propagates to the caller.
pub trait KvVisitor {
    fn visit(&mut self, key: &[u8], value: &[u8]) -> Result<()>;
}

pub trait KvStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;
    fn put(&mut self, key: &[u8], value: &[u8], mode: PutMode) -> Result<()>;
    /// Deleting an absent key is not an error.
    fn delete(&mut self, key: &[u8]) -> Result<()>;
    /// Visit every record in byte-lexicographic key order.
    fn iterate(&self, visitor: &mut dyn KvVisitor) -> Result<()>;
    /// Move a record found during iteration to a new key. Safe to call
    /// once the walk has finished; implementations may defer the move.
    fn update_in_iterate(&mut self, old: &[u8], new: &[u8], value: &[u8]) -> Result<()>;
    fn tx_begin(&mut self) -> Result<()>;
    fn tx_commit(&mut self) -> Result<()>;
    fn tx_cancel(&mut self) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryKv {
    records: BTreeMap<Vec<u8>, Vec<u8>>,
    /// Pre-transaction state, restored on cancel.
    rollback: Option<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Full copy of the store contents, for test assertions.
    pub fn snapshot(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.records
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl KvStore for MemoryKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.records.get(key).cloned())
    }

    fn put(&mut self, key: &[u8], value: &[u8], mode: PutMode) -> Result<()> {
        if mode == PutMode::Insert && self.records.contains_key(key) {
            return Err(FaroError::Operations(format!(
                "key already exists: {}",
                String::from_utf8_lossy(key)
            )));
        }
        self.records.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.records.remove(key);
        Ok(())
    }

    fn iterate(&self, visitor: &mut dyn KvVisitor) -> Result<()> {
        for (key, value) in &self.records {
            visitor.visit(key, value)?;
        }
        Ok(())
    }

    fn update_in_iterate(&mut self, old: &[u8], new: &[u8], value: &[u8]) -> Result<()> {
        self.records.remove(old);
        self.records.insert(new.to_vec(), value.to_vec());
        Ok(())
    }

    fn tx_begin(&mut self) -> Result<()> {
        if self.rollback.is_some() {
            return Err(FaroError::Operations("store transaction already open".into()));
        }
        self.rollback = Some(self.records.clone());
        Ok(())
    }

    fn tx_commit(&mut self) -> Result<()> {
        self.rollback
            .take()
            .map(|_| ())
            .ok_or_else(|| FaroError::Operations("no open store transaction".into()))
    }

    fn tx_cancel(&mut self) -> Result<()> {
        match self.rollback.take() {
            Some(saved) => {
                self.records = saved;
                Ok(())
            }
            None => Err(FaroError::Operations("no open store transaction".into())),
        }
    }
}
