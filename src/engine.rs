//! The database engine handle.
//!
//! Owns the backing store, the attribute schema, the index
//! configuration cache and (while a transaction is open) the index
//! write overlay. Entry-level mutation and the transaction lifecycle
//! live here; index maintenance proper is implemented in the
//! `index` modules as further `impl` blocks on this type.

use crate::config::Config;
use crate::dn::Dn;
use crate::index::{TxOverlay, IDXATTR, IDXGUID, IDXONE, IDX_DN_GUID, INDEXLIST_DN};
use crate::index::dn_list::IndexMode;
use crate::kv::{KvStore, PutMode};
use crate::message::Message;
use crate::schema::{attr_casefold, Schema};
use faro_types::{FaroError, Result, GUID_SIZE};
use tracing::debug;

/// Resolved indexing configuration: the merge of the engine `Config`
/// and the stored `@INDEXLIST` control record. Rebuilt by
/// [`Engine::reload_cache`].
#[derive(Debug, Clone, Default)]
pub(crate) struct IndexCache {
    pub guid_attr: Option<String>,
    pub guid_dn_component: Option<String>,
    pub one_level_indexes: bool,
    /// Whether any attribute is equality-indexed at all.
    pub attribute_indexes: bool,
    /// Case-folded names from `@IDXATTR`; empty under schema override.
    pub indexed_attrs: Vec<String>,
}

impl IndexCache {
    pub fn mode(&self) -> IndexMode {
        if self.guid_attr.is_some() {
            IndexMode::Guid
        } else {
            IndexMode::Dn
        }
    }
}

pub struct Engine<S: KvStore> {
    pub(crate) store: S,
    pub(crate) schema: Schema,
    pub(crate) config: Config,
    pub(crate) cache: IndexCache,
    pub(crate) overlay: Option<TxOverlay>,
}

impl<S: KvStore> Engine<S> {
    pub fn open(store: S, schema: Schema, config: Config) -> Result<Self> {
        let mut engine = Engine {
            store,
            schema,
            config,
            cache: IndexCache::default(),
            overlay: None,
        };
        engine.reload_cache()?;
        Ok(engine)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Give the backing store back, e.g. to reopen it under a
    /// different configuration.
    pub fn into_store(self) -> S {
        self.store
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub(crate) fn mode(&self) -> IndexMode {
        self.cache.mode()
    }

    /// Re-read `@INDEXLIST` and rebuild the resolved index
    /// configuration. Explicit configuration wins over the stored
    /// control record; `override_indexlist` skips the record entirely
    /// and lets schema flags drive attribute selection.
    pub fn reload_cache(&mut self) -> Result<()> {
        let mut cache = IndexCache {
            guid_attr: self.config.guid_attr.clone(),
            guid_dn_component: self.config.guid_dn_component.clone(),
            one_level_indexes: self.config.one_level_indexes,
            attribute_indexes: self.config.override_indexlist,
            indexed_attrs: Vec::new(),
        };

        if !self.config.override_indexlist {
            let key = record_key_for_special(INDEXLIST_DN);
            if let Some(indexlist) = self.fetch_record_by_key(&key)? {
                if let Some(el) = indexlist.find_element(IDXATTR) {
                    for value in &el.values {
                        let name = std::str::from_utf8(value).map_err(|_| {
                            FaroError::Corruption("@IDXATTR value is not valid UTF-8".into())
                        })?;
                        cache.indexed_attrs.push(attr_casefold(name));
                    }
                }
                cache.one_level_indexes |= indexlist.find_attr_as_bool(IDXONE, false);
                if cache.guid_attr.is_none() {
                    cache.guid_attr =
                        indexlist.find_attr_as_str(IDXGUID).map(|s| s.to_string());
                }
                if cache.guid_dn_component.is_none() {
                    cache.guid_dn_component =
                        indexlist.find_attr_as_str(IDX_DN_GUID).map(|s| s.to_string());
                }
                cache.attribute_indexes = !cache.indexed_attrs.is_empty();
            }
        }

        if let Some(guid_attr) = &cache.guid_attr {
            if guid_attr.starts_with('@') {
                return Err(FaroError::Operations(
                    "the GUID attribute cannot be a control attribute".into(),
                ));
            }
        }

        self.cache = cache;
        Ok(())
    }

    /// Is this attribute equality-indexed? The GUID attribute itself
    /// is implicitly covered by the entry keys and reports false.
    pub(crate) fn is_indexed(&self, attr: &str) -> bool {
        if let Some(guid_attr) = &self.cache.guid_attr {
            if guid_attr.eq_ignore_ascii_case(attr) {
                return false;
            }
        }
        if self.config.override_indexlist {
            return self.schema.flags_for(attr) & crate::schema::ATTR_INDEXED != 0;
        }
        if !self.cache.attribute_indexes {
            return false;
        }
        let folded = attr_casefold(attr);
        self.cache.indexed_attrs.iter().any(|a| *a == folded)
    }

    // ---- entry ids and storage keys ----

    /// The GUID attribute value of a message, validated to size.
    pub(crate) fn guid_value<'m>(&self, msg: &'m Message) -> Result<&'m [u8]> {
        let attr = self.cache.guid_attr.as_deref().ok_or_else(|| {
            FaroError::Operations("no GUID attribute configured".into())
        })?;
        let value = msg.find_first_value(attr).ok_or_else(|| {
            FaroError::Operations(format!("entry {} has no {attr} value", msg.dn))
        })?;
        if value.len() != GUID_SIZE {
            return Err(FaroError::Operations(format!(
                "entry {} has a {attr} value of {} bytes, expected {GUID_SIZE}",
                msg.dn,
                value.len()
            )));
        }
        Ok(value)
    }

    /// The engine-internal id of a message: case-folded DN bytes in DN
    /// mode, the raw GUID in GUID mode.
    pub(crate) fn eid_for_msg(&self, msg: &Message) -> Result<Vec<u8>> {
        match self.mode() {
            IndexMode::Dn => Ok(msg.dn.casefold().into_bytes()),
            IndexMode::Guid => Ok(self.guid_value(msg)?.to_vec()),
        }
    }

    /// Translate an entry id into its backing-store key.
    pub(crate) fn eid_to_key(&self, id: &[u8]) -> Result<Vec<u8>> {
        match self.mode() {
            IndexMode::Dn => {
                let mut key = b"DN=".to_vec();
                key.extend(id.iter().map(|b| b.to_ascii_uppercase()));
                Ok(key)
            }
            IndexMode::Guid => {
                if id.len() != GUID_SIZE {
                    return Err(FaroError::Corruption(format!(
                        "index entry of {} bytes is not a GUID",
                        id.len()
                    )));
                }
                let mut key = b"GUID=".to_vec();
                key.extend_from_slice(id);
                Ok(key)
            }
        }
    }

    /// The backing-store key a message should be stored under in the
    /// current mode. Special records always use the `DN=` form.
    pub(crate) fn record_key_for_msg(&self, msg: &Message) -> Result<Vec<u8>> {
        if msg.dn.is_special() || self.mode() == IndexMode::Dn {
            return Ok(record_key_for_dn(&msg.dn));
        }
        let mut key = b"GUID=".to_vec();
        key.extend_from_slice(self.guid_value(msg)?);
        Ok(key)
    }

    // ---- record I/O ----

    pub(crate) fn fetch_record_by_key(&self, key: &[u8]) -> Result<Option<Message>> {
        match self.store.get(key)? {
            Some(data) => Ok(Some(Message::unpack(&data)?)),
            None => Ok(None),
        }
    }

    pub(crate) fn store_record(&mut self, msg: &Message, mode: PutMode) -> Result<()> {
        let key = self.record_key_for_msg(msg)?;
        let data = msg.pack()?;
        self.store.put(&key, &data, mode)
    }

    // ---- DN to storage key ----

    /// Resolve a DN to the backing-store key of its entry.
    ///
    /// In DN mode the key is a pure function of the name. In GUID mode
    /// the `@IDXDN` family supplies the GUID; a truncated index key
    /// may cover several DNs sharing a prefix, in which case each
    /// candidate record is inspected until the DN matches. Records
    /// that vanished since the index was written are skipped.
    pub fn key_for_dn(&self, dn: &Dn) -> Result<Option<Vec<u8>>> {
        if dn.is_special() || self.mode() == IndexMode::Dn {
            return Ok(Some(record_key_for_dn(dn)));
        }

        let (list, truncated) = self.index_dn_base(dn)?;
        if list.is_empty() {
            return Ok(None);
        }
        if list.len() > 1 && !truncated {
            return Err(FaroError::ConstraintViolation(format!(
                "DN index for {dn} holds {} values, expected at most one",
                list.len()
            )));
        }

        if truncated {
            for id in &list.ids {
                let key = self.eid_to_key(id)?;
                let Some(rec) = self.fetch_record_by_key(&key)? else {
                    continue;
                };
                if rec.dn == *dn {
                    return Ok(Some(key));
                }
            }
            return Ok(None);
        }

        Ok(Some(self.eid_to_key(&list.ids[0])?))
    }

    // ---- transactions ----

    /// Start a transaction: one on the backing store, plus the index
    /// write overlay. Every index record mutation until commit or
    /// cancel is collected in memory and written out once.
    pub fn tx_begin(&mut self) -> Result<()> {
        if self.overlay.is_some() {
            return Err(FaroError::Operations("transaction already open".into()));
        }
        self.store.tx_begin()?;
        self.overlay = Some(TxOverlay::new());
        debug!("index transaction started");
        Ok(())
    }

    /// Flush the overlay and commit the backing store. Every staged
    /// index record is attempted even after a failure; the first
    /// error wins and rolls the store transaction back.
    pub fn tx_commit(&mut self) -> Result<()> {
        let overlay = self
            .overlay
            .take()
            .ok_or_else(|| FaroError::Operations("no open transaction".into()))?;
        let staged = overlay.len();
        if let Err(e) = self.flush_overlay(overlay) {
            let _ = self.store.tx_cancel();
            return Err(e);
        }
        self.store.tx_commit()?;
        debug!(staged, "index transaction committed");
        Ok(())
    }

    /// Write every staged index record out. All entries are attempted
    /// even after a failure; the first error wins.
    pub(crate) fn flush_overlay(&mut self, overlay: TxOverlay) -> Result<()> {
        let mut first_error = None;
        for (key, list) in overlay.into_entries() {
            if let Err(e) = self.dn_list_store_full(&key, &list) {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(FaroError::Operations(format!(
                "failed to store index records in transaction commit: {e}"
            ))),
            None => Ok(()),
        }
    }

    /// Drop the overlay and roll the backing store back.
    pub fn tx_cancel(&mut self) {
        if self.overlay.take().is_some() {
            let _ = self.store.tx_cancel();
            debug!("index transaction cancelled");
        }
    }

    pub fn in_transaction(&self) -> bool {
        self.overlay.is_some()
    }

    // ---- entry mutation ----

    /// Store a new entry and index it. A failure while indexing
    /// unwinds whatever index entries were already written.
    pub fn add(&mut self, msg: &Message) -> Result<()> {
        if msg.dn.is_empty() {
            return Err(FaroError::InvalidDn("cannot add the empty DN".into()));
        }
        if msg.dn.is_special() {
            self.store_record(msg, PutMode::Replace)?;
            if msg.dn.linearized() == INDEXLIST_DN {
                self.reload_cache()?;
            }
            return Ok(());
        }

        let key = self.record_key_for_msg(msg)?;
        if self.store.get(&key)?.is_some() {
            return Err(FaroError::ConstraintViolation(format!(
                "entry {} already exists",
                msg.dn
            )));
        }
        self.store.put(&key, &msg.pack()?, PutMode::Insert)?;

        if let Err(e) = self.index_add_new(msg) {
            self.store.delete(&key)?;
            return Err(e);
        }
        Ok(())
    }

    /// Remove an entry and its index entries.
    pub fn delete(&mut self, dn: &Dn) -> Result<()> {
        if dn.is_special() {
            return self.store.delete(&record_key_for_dn(dn));
        }
        let key = self
            .key_for_dn(dn)?
            .ok_or(FaroError::NotFound("entry"))?;
        let msg = self
            .fetch_record_by_key(&key)?
            .ok_or(FaroError::NotFound("entry"))?;
        self.store.delete(&key)?;
        self.index_delete(&msg)
    }
}

/// `DN=` storage key for a name, case folded unless special.
pub(crate) fn record_key_for_dn(dn: &Dn) -> Vec<u8> {
    let mut key = b"DN=".to_vec();
    key.extend_from_slice(dn.casefold().as_bytes());
    key
}

pub(crate) fn record_key_for_special(name: &str) -> Vec<u8> {
    let mut key = b"DN=".to_vec();
    key.extend_from_slice(name.as_bytes());
    key
}
