//! Loading and saving individual index records.
//!
//! A load consults the transaction overlay first and falls back to the
//! backing store; a save goes to the overlay while a transaction is
//! open and straight to the store otherwise. Version discipline lives
//! here: a record written in the wrong format for the current key mode
//! is corruption, not something to silently re-interpret.

use crate::engine::{record_key_for_special, Engine};
use crate::index::dn_list::{DnList, IndexMode};
use crate::index::{GUID_INDEXING_VERSION, IDX, IDXVERSION, INDEXING_VERSION};
use crate::kv::{KvStore, PutMode};
use crate::message::{Element, Message};
use faro_types::{FaroError, Result, GUID_SIZE};
use tracing::debug;

impl<S: KvStore> Engine<S> {
    /// Load the id list of one index record. Absent records load as an
    /// empty list.
    pub(crate) fn dn_list_load(&self, index_dn: &str) -> Result<DnList> {
        if let Some(overlay) = &self.overlay {
            if let Some(list) = overlay.get(index_dn.as_bytes()) {
                return Ok(list.clone());
            }
        }

        let key = record_key_for_special(index_dn);
        let Some(msg) = self.fetch_record_by_key(&key)? else {
            return Ok(DnList::new());
        };
        let Some(el) = msg.find_element(IDX) else {
            return Ok(DnList::new());
        };
        let version = msg.find_attr_as_u32(IDXVERSION, 0);

        match self.mode() {
            IndexMode::Dn => {
                if version != INDEXING_VERSION {
                    debug!(version, index_dn, "wrong DN index record version");
                    return Err(FaroError::Corruption(format!(
                        "wrong index version {version} (expected {INDEXING_VERSION}) for {index_dn}"
                    )));
                }
                Ok(DnList::from_ids(el.values.clone()))
            }
            IndexMode::Guid => {
                if version != GUID_INDEXING_VERSION {
                    // likely a leftover from before the key-mode switch
                    debug!(version, index_dn, "wrong GUID index record version");
                    return Err(FaroError::Corruption(format!(
                        "wrong index version {version} (expected {GUID_INDEXING_VERSION}) for {index_dn}"
                    )));
                }
                let Some(packed) = el.values.first() else {
                    return Err(FaroError::Corruption(format!(
                        "GUID index record {index_dn} has no value"
                    )));
                };
                if packed.is_empty() || packed.len() % GUID_SIZE != 0 {
                    return Err(FaroError::Corruption(format!(
                        "GUID index record {index_dn} has {} bytes, not a positive multiple of {GUID_SIZE}",
                        packed.len()
                    )));
                }
                let ids = packed
                    .chunks_exact(GUID_SIZE)
                    .map(|chunk| chunk.to_vec())
                    .collect();
                Ok(DnList::from_ids(ids))
            }
        }
    }

    /// Save an id list, through the overlay when a transaction is
    /// open.
    pub(crate) fn dn_list_store(&mut self, index_dn: &str, list: DnList) -> Result<()> {
        if let Some(overlay) = &mut self.overlay {
            overlay.insert(index_dn.as_bytes().to_vec(), list);
            return Ok(());
        }
        self.dn_list_store_full(index_dn.as_bytes(), &list)
    }

    /// Write an index record directly to the backing store. An empty
    /// list deletes the record instead.
    pub(crate) fn dn_list_store_full(&mut self, index_dn: &[u8], list: &DnList) -> Result<()> {
        let key = {
            let mut key = b"DN=".to_vec();
            key.extend_from_slice(index_dn);
            key
        };
        if list.is_empty() {
            return self.store.delete(&key);
        }

        let name = std::str::from_utf8(index_dn)
            .map_err(|_| FaroError::Operations("index record name is not valid UTF-8".into()))?;
        let mut msg = Message::new(crate::dn::Dn::parse(name)?);
        let idx_element = match self.mode() {
            IndexMode::Dn => {
                msg.add(IDXVERSION, INDEXING_VERSION.to_string().as_bytes());
                Element::new(IDX, list.ids.clone())
            }
            IndexMode::Guid => {
                msg.add(IDXVERSION, GUID_INDEXING_VERSION.to_string().as_bytes());
                let mut packed = Vec::with_capacity(list.len() * GUID_SIZE);
                for id in &list.ids {
                    if id.len() != GUID_SIZE {
                        return Err(FaroError::Operations(format!(
                            "index entry of {} bytes is not a GUID",
                            id.len()
                        )));
                    }
                    packed.extend_from_slice(id);
                }
                Element::new(IDX, vec![packed])
            }
        };
        msg.elements.push(idx_element);
        self.store.put(&key, &msg.pack()?, PutMode::Replace)
    }
}
