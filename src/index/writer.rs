//! Keeping index records in step with entry mutations.

use crate::dn::Dn;
use crate::engine::Engine;
use crate::index::dn_list::IndexMode;
use crate::index::key::index_key;
use crate::index::{IDXDN, IDXONE};
use crate::kv::KvStore;
use crate::message::{Element, Message, ELEMENT_FORCE_UNIQUE};
use crate::schema::{Syntax, ATTR_UNIQUE_INDEX};
use faro_types::{FaroError, Result};
use tracing::warn;

impl<S: KvStore> Engine<S> {
    /// Index a freshly stored entry: the DN-to-GUID family, every
    /// indexed attribute value, and the one-level family. Any failure
    /// unwinds the index entries already written, so a caller that is
    /// sloppy about transactions still never leaks half an index.
    pub fn index_add_new(&mut self, msg: &Message) -> Result<()> {
        if msg.dn.is_special() {
            return Ok(());
        }

        if let Err(e) = self.index_add_all(msg) {
            let _ = self.index_delete(msg);
            return Err(e);
        }
        if let Err(e) = self.index_onelevel(msg, true) {
            let _ = self.index_delete(msg);
            return Err(e);
        }
        Ok(())
    }

    /// Remove every index entry for a message.
    pub fn index_delete(&mut self, msg: &Message) -> Result<()> {
        if msg.dn.is_special() {
            return Ok(());
        }
        self.index_onelevel(msg, false)?;
        self.write_index_dn_guid(msg, false)?;
        for el in &msg.elements {
            self.index_del_element(msg, el)?;
        }
        Ok(())
    }

    /// Index the values of one new element. The caller guarantees the
    /// values are not yet indexed.
    pub fn index_add_element(&mut self, msg: &Message, el: &Element) -> Result<()> {
        if msg.dn.is_special() || !self.is_indexed(&el.name) {
            return Ok(());
        }
        self.index_add_el(msg, el)
    }

    /// Drop the index entries of one removed element.
    pub fn index_del_element(&mut self, msg: &Message, el: &Element) -> Result<()> {
        if msg.dn.is_special() || !self.is_indexed(&el.name) {
            return Ok(());
        }
        for v_idx in 0..el.values.len() {
            self.index_del_value(msg, el, v_idx)?;
        }
        Ok(())
    }

    pub(crate) fn index_add_all(&mut self, msg: &Message) -> Result<()> {
        if msg.dn.is_special() {
            return Ok(());
        }

        self.write_index_dn_guid(msg, true)?;

        for el in &msg.elements {
            if !self.is_indexed(&el.name) {
                continue;
            }
            if let Err(e) = self.index_add_el(msg, el) {
                warn!(attr = %el.name, dn = %msg.dn, "failed to index element");
                return Err(e);
            }
        }
        Ok(())
    }

    fn index_add_el(&mut self, msg: &Message, el: &Element) -> Result<()> {
        for v_idx in 0..el.values.len() {
            self.index_add1(msg, el, v_idx)?;
        }
        Ok(())
    }

    /// Add one (attribute, value) -> id entry.
    fn index_add1(&mut self, msg: &Message, el: &Element, v_idx: usize) -> Result<()> {
        let (key, attr_schema) = index_key(
            &self.schema,
            self.mode(),
            self.config.max_key_length,
            &el.name,
            &el.values[v_idx],
        )?;

        let unique = attr_schema
            .map(|a| a.flags & ATTR_UNIQUE_INDEX != 0)
            .unwrap_or(false)
            || el.flags & ELEMENT_FORCE_UNIQUE != 0;

        // A truncated key may cover several distinct values, so
        // uniqueness cannot be decided from the list alone.
        if key.truncated && unique {
            return Err(FaroError::ConstraintViolation(format!(
                "unique index key on {} in {} exceeds the maximum key length",
                el.name, msg.dn
            )));
        }

        let mut list = self.dn_list_load(&key.dn)?;

        if !list.is_empty() && el.name == IDXDN {
            if !key.truncated {
                // an entry with this DN is already indexed
                return Err(FaroError::ConstraintViolation(format!(
                    "entry {} already exists",
                    msg.dn
                )));
            }
            // Truncated DN keys collide across distinct DNs; only a
            // record with the very same DN is a real duplicate. Ids
            // whose record has vanished are stale and ignored.
            for id in &list.ids {
                let record_key = self.eid_to_key(id)?;
                let Some(rec) = self.fetch_record_by_key(&record_key)? else {
                    continue;
                };
                if rec.dn == msg.dn {
                    return Err(FaroError::ConstraintViolation(format!(
                        "entry {} already exists",
                        msg.dn
                    )));
                }
            }
        }

        if !list.is_empty() && unique && el.name != IDXDN {
            // Never name the conflicting entry by DN; in GUID mode the
            // GUID is enough for an operator to chase it down.
            match self.mode() {
                IndexMode::Dn => warn!(
                    attr = %el.name,
                    dn = %msg.dn,
                    conflict = %String::from_utf8_lossy(&list.ids[0]),
                    index = %key.dn,
                    "unique index violation"
                ),
                IndexMode::Guid => warn!(
                    attr = %el.name,
                    dn = %msg.dn,
                    conflict = %Syntax::Guid.ldif_write(&list.ids[0]),
                    index = %key.dn,
                    "unique index violation"
                ),
            }
            return Err(FaroError::ConstraintViolation(format!(
                "unique index violation on {} in {}",
                el.name, msg.dn
            )));
        }

        // pad capacity to the next multiple of 8 to amortise repeated
        // single-value inserts into the same record
        let padded = (list.len() + 1 + 7) & !7;
        list.ids.reserve(padded - list.len());

        match self.mode() {
            IndexMode::Dn => {
                list.ids.push(msg.dn.casefold().into_bytes());
            }
            IndexMode::Guid => {
                let id = self.guid_value(msg)?.to_vec();
                let pos = match list.search(&id) {
                    Ok(pos) => {
                        if !key.truncated {
                            warn!(
                                dn = %msg.dn,
                                attr = %el.name,
                                value = %Syntax::Guid.ldif_write(&id),
                                index = %key.dn,
                                "duplicate attribute value for index"
                            );
                        }
                        pos
                    }
                    Err(pos) => pos,
                };
                list.ids.insert(pos, id);
            }
        }

        self.dn_list_store(&key.dn, list)
    }

    /// Remove one (attribute, value) -> id entry. Missing records and
    /// absent ids are fine: an earlier failed add may already have
    /// unwound them.
    pub fn index_del_value(&mut self, msg: &Message, el: &Element, v_idx: usize) -> Result<()> {
        if msg.dn.is_special() {
            return Ok(());
        }

        let (key, _) = index_key(
            &self.schema,
            self.mode(),
            self.config.max_key_length,
            &el.name,
            &el.values[v_idx],
        )?;

        let mut list = self.dn_list_load(&key.dn)?;
        if list.is_empty() {
            return Ok(());
        }

        let Ok(eid) = self.eid_for_msg(msg) else {
            return Ok(());
        };
        let Some(pos) = list.find(self.mode(), &eid) else {
            return Ok(());
        };
        list.ids.remove(pos);
        self.dn_list_store(&key.dn, list)
    }

    /// Maintain the parent-to-children family for a message.
    pub(crate) fn index_onelevel(&mut self, msg: &Message, add: bool) -> Result<()> {
        if !self.cache.one_level_indexes {
            return Ok(());
        }
        let parent = msg.dn.parent().ok_or_else(|| {
            FaroError::Operations(format!("entry {} has no parent DN", msg.dn))
        })?;
        self.modify_index_dn(msg, &parent, IDXONE, add)
    }

    /// Maintain the DN-to-GUID family for a message (GUID mode only).
    fn write_index_dn_guid(&mut self, msg: &Message, add: bool) -> Result<()> {
        if self.mode() == IndexMode::Dn {
            return Ok(());
        }
        self.modify_index_dn(msg, &msg.dn, IDXDN, add)
    }

    /// Add or remove an entry under a synthesised DN-valued family.
    fn modify_index_dn(&mut self, msg: &Message, dn: &Dn, family: &str, add: bool) -> Result<()> {
        let el = Element::new(family, vec![dn.casefold().into_bytes()]);
        if add {
            self.index_add1(msg, &el, 0)
        } else {
            self.index_del_value(msg, &el, 0)
        }
    }
}
