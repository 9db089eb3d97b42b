//! Producing candidate id lists from a parsed filter tree.
//!
//! Three outcomes matter to the caller: a concrete candidate list (it
//! may over-match, the search layer re-filters), a proof that nothing
//! can match, or an admission that the indexes cannot answer and a
//! full scan is needed.

use crate::dn::Dn;
use crate::engine::Engine;
use crate::filter::FilterTree;
use crate::index::dn_list::DnList;
use crate::index::key::index_key;
use crate::index::{IDXDN, IDXONE};
use crate::kv::KvStore;
use crate::schema::{attr_is_dn, Syntax, ATTR_UNIQUE_INDEX};
use faro_types::Result;

/// Outcome of planning a filter subtree.
#[derive(Debug)]
pub enum Plan {
    /// Candidate ids; a superset of the true matches.
    List(DnList),
    /// The subtree provably selects nothing.
    NoMatch,
    /// The indexes cannot answer this subtree.
    Unindexed,
}

impl<S: KvStore> Engine<S> {
    /// Walk a filter tree and produce candidates from the indexes.
    pub fn plan_filter(&self, tree: &FilterTree) -> Result<Plan> {
        match tree {
            FilterTree::Equality { attr, value } => self.plan_leaf(attr, value),
            FilterTree::And(children) => self.plan_and(children),
            FilterTree::Or(children) => self.plan_or(children),
            // An indexed NOT would need the complement of a list; an
            // outer AND may still narrow things down.
            FilterTree::Not(_)
            | FilterTree::Substring { .. }
            | FilterTree::Greater { .. }
            | FilterTree::Less { .. }
            | FilterTree::Present { .. }
            | FilterTree::Approx { .. }
            | FilterTree::Extended { .. } => Ok(Plan::Unindexed),
        }
    }

    fn plan_leaf(&self, attr: &str, value: &[u8]) -> Result<Plan> {
        if self.config.disallow_dn_filter && attr_is_dn(attr) {
            // not supported as a filter; matches nothing rather than
            // falling back to an unbounded scan
            return Ok(Plan::List(DnList::new()));
        }
        if attr.starts_with('@') {
            return Ok(Plan::List(DnList::new()));
        }
        if attr_is_dn(attr) {
            let Ok(text) = std::str::from_utf8(value) else {
                return Ok(Plan::List(DnList::new()));
            };
            let Ok(dn) = Dn::parse(text) else {
                return Ok(Plan::List(DnList::new()));
            };
            if dn.is_special() || dn.is_empty() {
                return Ok(Plan::List(DnList::new()));
            }
            let (list, _truncation) = self.index_dn_base(&dn)?;
            if list.is_empty() {
                return Ok(Plan::NoMatch);
            }
            return Ok(Plan::List(list));
        }
        if let Some(guid_attr) = &self.cache.guid_attr {
            if guid_attr.eq_ignore_ascii_case(attr) {
                // entry keys double as the index for the GUID attribute
                let Ok(id) = Syntax::Guid.canonicalise(value) else {
                    return Ok(Plan::Unindexed);
                };
                return Ok(Plan::List(DnList::from_ids(vec![id])));
            }
        }
        self.plan_simple(attr, value)
    }

    /// An equality lookup on an ordinary indexed attribute.
    fn plan_simple(&self, attr: &str, value: &[u8]) -> Result<Plan> {
        if !self.is_indexed(attr) {
            return Ok(Plan::Unindexed);
        }
        let Ok((key, _)) = index_key(
            &self.schema,
            self.mode(),
            self.config.max_key_length,
            attr,
            value,
        ) else {
            return Ok(Plan::Unindexed);
        };
        // truncation is ignored here: an over-matching list is fine,
        // the re-filter drops the strays
        Ok(Plan::List(self.dn_list_load(&key.dn)?))
    }

    fn plan_or(&self, children: &[FilterTree]) -> Result<Plan> {
        let mut acc = DnList::new();
        for child in children {
            match self.plan_filter(child)? {
                Plan::NoMatch => continue,
                // one un-answerable branch poisons the whole union
                Plan::Unindexed => return Ok(Plan::Unindexed),
                Plan::List(list) => acc.union(self.mode(), list),
            }
        }
        if acc.is_empty() {
            return Ok(Plan::NoMatch);
        }
        Ok(Plan::List(acc))
    }

    fn plan_and(&self, children: &[FilterTree]) -> Result<Plan> {
        // First pass: a unique-attribute equality bounds the result to
        // at most one entry, so any hit short-circuits the whole AND.
        for child in children {
            let FilterTree::Equality { attr, .. } = child else {
                continue;
            };
            if !self.index_unique(attr) {
                continue;
            }
            match self.plan_filter(child)? {
                Plan::NoMatch => return Ok(Plan::NoMatch),
                Plan::List(list) => return Ok(Plan::List(list)),
                Plan::Unindexed => continue,
            }
        }

        // Second pass: intersect whatever the children can answer.
        let mut acc: Option<DnList> = None;
        for child in children {
            match self.plan_filter(child)? {
                Plan::NoMatch => return Ok(Plan::NoMatch),
                Plan::Unindexed => continue,
                Plan::List(list) => match acc.as_mut() {
                    None => acc = Some(list),
                    Some(current) => current.intersect(self.mode(), &list),
                },
            }
            if let Some(current) = &acc {
                if current.is_empty() {
                    return Ok(Plan::NoMatch);
                }
                if current.len() < 2 {
                    // not worth loading the rest of the tree
                    break;
                }
            }
        }

        match acc {
            Some(list) => Ok(Plan::List(list)),
            None => Ok(Plan::Unindexed),
        }
    }

    /// Unique attributes bound an AND to a single entry: the entry
    /// key attribute, the DN pseudo-attribute, and anything the schema
    /// flags unique.
    fn index_unique(&self, attr: &str) -> bool {
        if let Some(guid_attr) = &self.cache.guid_attr {
            if guid_attr.eq_ignore_ascii_case(attr) {
                return true;
            }
        }
        if attr_is_dn(attr) {
            return true;
        }
        self.schema.flags_for(attr) & ATTR_UNIQUE_INDEX != 0
    }

    /// Candidates for a base-DN lookup. In DN mode the name itself is
    /// the id; in GUID mode an extended DN component short-circuits
    /// the `@IDXDN` fetch.
    pub(crate) fn index_dn_base(&self, dn: &Dn) -> Result<(DnList, bool)> {
        if self.cache.guid_attr.is_none() {
            let list = DnList::from_ids(vec![dn.casefold().into_bytes()]);
            return Ok((list, false));
        }
        if let Some(component) = &self.cache.guid_dn_component {
            if let Some(guid) = dn.extended_component(component) {
                return Ok((DnList::from_ids(vec![guid.to_vec()]), false));
            }
        }
        self.index_dn_attr(IDXDN, dn)
    }

    /// The exact children of a parent DN. The list is strict: an
    /// intersection must never drop one of these ids, because the
    /// one-level result is trusted without a scope re-check.
    pub(crate) fn index_dn_one(&self, parent: &Dn) -> Result<(DnList, bool)> {
        let (mut list, truncated) = self.index_dn_attr(IDXONE, parent)?;
        list.strict = true;
        Ok((list, truncated))
    }

    /// Load the family record keyed by a casefolded DN.
    fn index_dn_attr(&self, family: &str, dn: &Dn) -> Result<(DnList, bool)> {
        let value = dn.casefold().into_bytes();
        let (key, _) = index_key(
            &self.schema,
            self.mode(),
            self.config.max_key_length,
            family,
            &value,
        )?;
        let list = self.dn_list_load(&key.dn)?;
        Ok((list, key.truncated))
    }
}
