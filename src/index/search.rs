//! Answering scoped, filtered searches from the indexes.
//!
//! The planner produces candidates; every candidate is re-checked
//! against the full filter before delivery, because index lookups are
//! allowed to over-match. The one exception is a one-level search
//! whose index key was not truncated: the children list is exact, so
//! only the filter (not the scope) needs re-checking.

use crate::dn::Dn;
use crate::engine::Engine;
use crate::filter::{match_message, match_scope, FilterTree, Scope};
use crate::index::dn_list::{DnList, IndexMode};
use crate::kv::{KvStore, KvVisitor};
use crate::message::Message;
use faro_types::{FaroError, Result};

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub base: Dn,
    pub scope: Scope,
    pub tree: FilterTree,
    /// Attribute projection; `None` (or a `*` entry) delivers all.
    pub attrs: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOutcome {
    /// Delivered this many entries.
    Matched(u32),
    /// The indexes could not bound the search; a full scan ran (or,
    /// from [`Engine::search_indexed`], must be run by the caller).
    FallbackFull,
}

/// Delivery sink for matched entries. An error terminates the search
/// immediately.
pub type SendEntry<'a> = dyn FnMut(Message) -> Result<()> + 'a;

impl<S: KvStore> Engine<S> {
    /// Dispatch a search request: base lookups are answered directly,
    /// everything else goes through the indexes with a full-scan
    /// fallback.
    pub fn search(&self, req: &SearchRequest, send: &mut SendEntry<'_>) -> Result<SearchOutcome> {
        if req.scope == Scope::Base {
            return self.search_base(req, send);
        }
        match self.search_indexed(req, send)? {
            SearchOutcome::FallbackFull => {
                let count = self.search_full(req, send)?;
                Ok(SearchOutcome::Matched(count))
            }
            outcome => Ok(outcome),
        }
    }

    /// Answer a non-base search from the indexes alone.
    ///
    /// Returns [`SearchOutcome::FallbackFull`] when no index can bound
    /// the candidate set and the caller must scan.
    pub fn search_indexed(
        &self,
        req: &SearchRequest,
        send: &mut SendEntry<'_>,
    ) -> Result<SearchOutcome> {
        if !self.cache.attribute_indexes
            && !self.cache.one_level_indexes
            && req.scope != Scope::Base
        {
            return Ok(SearchOutcome::FallbackFull);
        }

        // without a one-level index, a one-level search is planned
        // like a subtree search and re-filtered down
        let index_scope = if req.scope == Scope::OneLevel && !self.cache.one_level_indexes {
            Scope::Subtree
        } else {
            req.scope
        };

        match index_scope {
            Scope::Base => Err(FaroError::Operations(
                "base searches are answered by the dispatcher, not the index driver".into(),
            )),
            Scope::OneLevel => {
                let (mut candidates, one_truncated) = self.index_dn_one(&req.base)?;
                if candidates.is_empty() {
                    return Ok(SearchOutcome::Matched(0));
                }

                // In GUID mode, narrowing the children through the
                // attribute indexes first keeps the re-filter cheap:
                // intersecting two sorted GUID lists is O(n log m).
                if self.mode() == IndexMode::Guid {
                    if !self.cache.attribute_indexes {
                        return Ok(SearchOutcome::FallbackFull);
                    }
                    match self.plan_filter(&req.tree)? {
                        super::Plan::NoMatch => return Ok(SearchOutcome::Matched(0)),
                        super::Plan::List(filtered) => {
                            candidates.intersect(self.mode(), &filtered)
                        }
                        // e.g. a wildcard filter: fall through and
                        // re-filter all the children
                        super::Plan::Unindexed => {}
                    }
                }

                let count = self.index_filter(&candidates, req, one_truncated, send)?;
                Ok(SearchOutcome::Matched(count))
            }
            Scope::Subtree => {
                if !self.cache.attribute_indexes {
                    return Ok(SearchOutcome::FallbackFull);
                }
                match self.plan_filter(&req.tree)? {
                    super::Plan::Unindexed => Ok(SearchOutcome::FallbackFull),
                    super::Plan::NoMatch => Ok(SearchOutcome::Matched(0)),
                    super::Plan::List(candidates) => {
                        let count = self.index_filter(&candidates, req, false, send)?;
                        Ok(SearchOutcome::Matched(count))
                    }
                }
            }
        }
    }

    /// Re-filter candidate ids against the full request and deliver
    /// the survivors.
    fn index_filter(
        &self,
        candidates: &DnList,
        req: &SearchRequest,
        one_level_truncated: bool,
        send: &mut SendEntry<'_>,
    ) -> Result<u32> {
        // Take a stable copy of the keys first: a delivery callback is
        // allowed to mutate indexed attributes, which would move the
        // very list we are walking.
        let mut keys = Vec::with_capacity(candidates.len());
        let mut previous: Option<&[u8]> = None;
        for id in &candidates.ids {
            if self.mode() == IndexMode::Guid {
                // sorted candidates: drop consecutive duplicates,
                // which arise under truncation and forced duplicates
                if previous == Some(id.as_slice()) {
                    continue;
                }
                previous = Some(id.as_slice());
            }
            keys.push(self.eid_to_key(id)?);
        }

        // The one-level index is exact, so its scope needs no
        // re-check unless its key was truncated.
        let trusted_scope = req.scope == Scope::OneLevel
            && self.cache.one_level_indexes
            && !one_level_truncated;

        let mut count = 0u32;
        for key in keys {
            let Some(msg) = self.fetch_record_by_key(&key)? else {
                // deleted by an earlier delivery callback
                continue;
            };

            let matched = if trusted_scope {
                match_message(&self.schema, &msg, &req.tree)?
            } else {
                match_scope(&msg.dn, &req.base, req.scope)
                    && match_message(&self.schema, &msg, &req.tree)?
            };
            if !matched {
                continue;
            }

            send(project(&msg, req.attrs.as_deref()))?;
            count += 1;
        }
        Ok(count)
    }

    fn search_base(&self, req: &SearchRequest, send: &mut SendEntry<'_>) -> Result<SearchOutcome> {
        let key = self
            .key_for_dn(&req.base)?
            .ok_or(FaroError::NotFound("base entry"))?;
        let msg = self
            .fetch_record_by_key(&key)?
            .ok_or(FaroError::NotFound("base entry"))?;
        if !match_message(&self.schema, &msg, &req.tree)? {
            return Ok(SearchOutcome::Matched(0));
        }
        send(project(&msg, req.attrs.as_deref()))?;
        Ok(SearchOutcome::Matched(1))
    }

    /// Unindexed fallback: walk every data record.
    fn search_full(&self, req: &SearchRequest, send: &mut SendEntry<'_>) -> Result<u32> {
        let mut scan = RecordKeyScan::default();
        self.store.iterate(&mut scan)?;

        let mut count = 0u32;
        for key in scan.keys {
            let Some(msg) = self.fetch_record_by_key(&key)? else {
                continue;
            };
            if !match_scope(&msg.dn, &req.base, req.scope) {
                continue;
            }
            if !match_message(&self.schema, &msg, &req.tree)? {
                continue;
            }
            send(project(&msg, req.attrs.as_deref()))?;
            count += 1;
        }
        Ok(count)
    }
}

/// Collects the keys of ordinary data records, skipping control and
/// index records.
#[derive(Default)]
pub(crate) struct RecordKeyScan {
    pub keys: Vec<Vec<u8>>,
}

impl KvVisitor for RecordKeyScan {
    fn visit(&mut self, key: &[u8], _value: &[u8]) -> Result<()> {
        if is_data_record_key(key) {
            self.keys.push(key.to_vec());
        }
        Ok(())
    }
}

/// True for `DN=` and `GUID=` keys of non-control entries.
pub(crate) fn is_data_record_key(key: &[u8]) -> bool {
    if key.starts_with(b"DN=@") {
        return false;
    }
    key.starts_with(b"DN=") || key.starts_with(b"GUID=")
}

/// Apply the attribute projection. The entry name always survives.
fn project(msg: &Message, attrs: Option<&[String]>) -> Message {
    let Some(attrs) = attrs else {
        return msg.clone();
    };
    if attrs.iter().any(|a| a == "*") {
        return msg.clone();
    }
    let mut out = Message::new(msg.dn.clone());
    for el in &msg.elements {
        if attrs.iter().any(|a| a.eq_ignore_ascii_case(&el.name)) {
            out.elements.push(el.clone());
        }
    }
    out
}
