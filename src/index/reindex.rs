//! Full index rebuild.
//!
//! Three passes over the backing store: stage the deletion of every
//! existing index record, move data records whose storage key no
//! longer matches the current key mode, then rebuild every index from
//! the records themselves. All index writes land in a fresh
//! transaction overlay and reach the store in one commit, so most
//! index records are rewritten in place rather than churned.

use crate::engine::Engine;
use crate::index::dn_list::DnList;
use crate::index::search::{is_data_record_key, RecordKeyScan};
use crate::kv::{KvStore, KvVisitor};
use crate::message::Message;
use faro_types::{FaroError, Result};
use tracing::{info, warn};

const PROGRESS_INTERVAL: u32 = 10_000;

impl<S: KvStore> Engine<S> {
    /// Rebuild every index record from the stored entries.
    pub fn reindex(&mut self) -> Result<()> {
        if self.config.read_only {
            return Err(FaroError::Unwilling("reindex of a read-only database"));
        }

        self.reload_cache()?;

        // Nothing staged so far is usable: replace any in-flight
        // overlay with a clean one for the rebuild. The backing-store
        // transaction, if the caller holds one, stays theirs.
        self.overlay = Some(crate::index::TxOverlay::new());

        if let Err(e) = self.reindex_passes() {
            self.overlay = None;
            return Err(e);
        }

        let overlay = self.overlay.take().ok_or_else(|| {
            FaroError::Operations("reindex overlay disappeared mid-rebuild".into())
        })?;
        self.flush_overlay(overlay)
    }

    fn reindex_passes(&mut self) -> Result<()> {
        // Pass 1: stage an empty list for every index record, old and
        // new namespace alike. The records are deleted (or rewritten)
        // at commit, not here.
        let mut purge = IndexRecordScan::default();
        self.store.iterate(&mut purge)?;
        for name in purge.names {
            let name = String::from_utf8(name).map_err(|_| {
                FaroError::Corruption("index record key is not valid UTF-8".into())
            })?;
            self.dn_list_store(&name, DnList::new())?;
        }

        // Pass 2: the storage key of a record is a function of the key
        // mode and the case folding rules; both may have changed since
        // the record was written. Collect the moves during the walk
        // and apply them afterwards. The first failure is remembered
        // but the walk completes, so one bad record does not hide the
        // rest.
        let (moves, rekeyed, first_error) = {
            let engine = &*self;
            let mut scan = RekeyScan {
                engine,
                count: 0,
                first_error: None,
                moves: Vec::new(),
            };
            engine.store.iterate(&mut scan)?;
            (scan.moves, scan.count, scan.first_error)
        };
        for (old, new, value) in moves {
            self.store.update_in_iterate(&old, &new, &value)?;
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        // Pass 3: rebuild the one-level family and every attribute
        // index from each record.
        let mut keys = RecordKeyScan::default();
        self.store.iterate(&mut keys)?;
        let mut reindexed = 0u32;
        for key in keys.keys {
            let Some(data) = self.store.get(&key)? else {
                continue;
            };
            let msg = Message::unpack(&data)?;
            if msg.dn.is_empty() {
                return Err(FaroError::Corruption(format!(
                    "refusing to re-index record {} with no DN",
                    String::from_utf8_lossy(&key)
                )));
            }
            self.index_onelevel(&msg, true)?;
            self.index_add_all(&msg)?;
            reindexed += 1;
            if reindexed % PROGRESS_INTERVAL == 0 {
                warn!(records = reindexed, "reindexing: rebuilt indexes so far");
            }
        }

        if rekeyed > PROGRESS_INTERVAL || reindexed > PROGRESS_INTERVAL {
            info!(
                rekeyed,
                reindexed, "reindex finished, index write-out happens at commit"
            );
        }
        Ok(())
    }
}

/// Collects the record names of every stored index record.
#[derive(Default)]
struct IndexRecordScan {
    names: Vec<Vec<u8>>,
}

impl KvVisitor for IndexRecordScan {
    fn visit(&mut self, key: &[u8], _value: &[u8]) -> Result<()> {
        // both the exact and the truncated namespace; never the
        // @INDEXLIST control record
        const PREFIX: &[u8] = b"DN=@INDEX";
        if key.len() > PREFIX.len()
            && key[..PREFIX.len()].eq_ignore_ascii_case(PREFIX)
            && matches!(key[PREFIX.len()], b':' | b'#')
        {
            self.names.push(key[b"DN=".len()..].to_vec());
        }
        Ok(())
    }
}

/// Walks data records and computes which ones need a new storage key.
struct RekeyScan<'a, S: KvStore> {
    engine: &'a Engine<S>,
    count: u32,
    first_error: Option<FaroError>,
    moves: Vec<(Vec<u8>, Vec<u8>, Vec<u8>)>,
}

impl<S: KvStore> KvVisitor for RekeyScan<'_, S> {
    fn visit(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if !is_data_record_key(key) {
            return Ok(());
        }

        let msg = match Message::unpack(value) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(
                    key = %String::from_utf8_lossy(key),
                    "invalid record data during re-key"
                );
                self.first_error.get_or_insert(e);
                return Ok(());
            }
        };
        if msg.dn.is_empty() {
            self.first_error.get_or_insert(FaroError::Corruption(format!(
                "record {} has no DN",
                String::from_utf8_lossy(key)
            )));
            return Ok(());
        }

        match self.engine.record_key_for_msg(&msg) {
            Ok(expected) => {
                if expected != key {
                    self.moves
                        .push((key.to_vec(), expected, value.to_vec()));
                }
            }
            Err(e) => {
                self.first_error.get_or_insert(e);
            }
        }

        self.count += 1;
        if self.count % PROGRESS_INTERVAL == 0 {
            warn!(records = self.count, "reindexing: re-keyed records so far");
        }
        Ok(())
    }
}
