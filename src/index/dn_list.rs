//! Ordered, duplicate-free lists of entry ids.
//!
//! An id is either a case-folded linearised DN or a raw 16-byte GUID,
//! depending on the database key mode. GUID lists are kept sorted so
//! membership is a binary search and merges deduplicate in one pass;
//! DN lists are small per key and scanned linearly, sorted only when a
//! union needs to deduplicate.

use std::cmp::Ordering;

/// Database-wide choice of entry id representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexMode {
    /// Ids are case-folded linearised DNs.
    Dn,
    /// Ids are raw 16-byte GUIDs, kept memcmp-ascending.
    Guid,
}

/// Total order on ids: longer values first, then bytewise. For
/// fixed-size GUIDs this degenerates to plain memcmp ascending.
pub(crate) fn eid_cmp(a: &[u8], b: &[u8]) -> Ordering {
    match b.len().cmp(&a.len()) {
        Ordering::Equal => a.cmp(b),
        other => other,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DnList {
    pub ids: Vec<Vec<u8>>,
    /// Never drop ids from this list through lossy optimisation. Set
    /// on one-level results, which must be exact.
    pub strict: bool,
}

impl DnList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_ids(ids: Vec<Vec<u8>>) -> Self {
        DnList { ids, strict: false }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Locate an id. Binary search in GUID mode, linear scan in DN
    /// mode.
    pub fn find(&self, mode: IndexMode, id: &[u8]) -> Option<usize> {
        match mode {
            IndexMode::Guid => self.search(id).ok(),
            IndexMode::Dn => self.ids.iter().position(|v| v == id),
        }
    }

    /// Binary search by the id order; `Err` carries the insertion
    /// point. Only meaningful on sorted (GUID mode) lists.
    pub(crate) fn search(&self, id: &[u8]) -> Result<usize, usize> {
        self.ids.binary_search_by(|probe| eid_cmp(probe, id))
    }

    /// Sort for merging. GUID lists are sorted by construction.
    pub fn sort(&mut self, mode: IndexMode) {
        if self.ids.len() < 2 || mode == IndexMode::Guid {
            return;
        }
        self.ids.sort_unstable_by(|a, b| eid_cmp(a, b));
    }

    /// `self = self | other`, deduplicating.
    pub fn union(&mut self, mode: IndexMode, mut other: DnList) {
        if other.is_empty() {
            return;
        }
        if self.is_empty() {
            self.ids = other.ids;
            return;
        }

        self.sort(mode);
        other.sort(mode);

        let mut merged = Vec::with_capacity(self.ids.len() + other.ids.len());
        let mut a = std::mem::take(&mut self.ids).into_iter().peekable();
        let mut b = other.ids.into_iter().peekable();
        loop {
            let cmp = match (a.peek(), b.peek()) {
                (None, None) => break,
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(x), Some(y)) => eid_cmp(x, y),
            };
            match cmp {
                Ordering::Less => merged.push(a.next().unwrap()),
                Ordering::Greater => merged.push(b.next().unwrap()),
                Ordering::Equal => {
                    merged.push(a.next().unwrap());
                    b.next();
                }
            }
        }
        self.ids = merged;
    }

    /// `self = self & other`.
    ///
    /// When one side holds at most one id and the other is large, the
    /// small side may be returned unverified: the result is then a
    /// superset of the true intersection and the search layer's
    /// re-filter drops the extras. A strict input on either side
    /// disables the shortcut.
    pub fn intersect(&mut self, mode: IndexMode, other: &DnList) {
        let allow_shortcut = !self.strict && !other.strict;
        self.strict |= other.strict;

        if self.is_empty() {
            return;
        }
        if other.is_empty() {
            self.ids.clear();
            return;
        }

        if allow_shortcut {
            if self.ids.len() < 2 && other.ids.len() > 10 {
                return;
            }
            if other.ids.len() < 2 && self.ids.len() > 10 {
                self.ids = other.ids.clone();
                return;
            }
        }

        self.ids = if self.ids.len() <= other.ids.len() {
            self.ids
                .iter()
                .filter(|id| other.find(mode, id).is_some())
                .cloned()
                .collect()
        } else {
            other
                .ids
                .iter()
                .filter(|id| self.find(mode, id).is_some())
                .cloned()
                .collect()
        };
    }
}
