//! faro: the indexing engine of a directory-style key/value database.
//!
//! Entries are messages (a distinguished name plus a multi-valued
//! attribute map) stored in an ordered byte-key store. This crate
//! maintains secondary index records over them and uses those records
//! to answer LDAP-style filtered searches without scanning.

pub mod config;
pub mod dn;
pub mod engine;
pub mod filter;
pub mod index;
pub mod kv;
pub mod message;
pub mod schema;

pub use crate::config::Config;
pub use crate::dn::Dn;
pub use crate::engine::Engine;
pub use crate::filter::{FilterTree, Scope};
pub use crate::index::{
    DnList, IndexMode, Plan, SearchOutcome, SearchRequest, SendEntry, TxOverlay,
};
pub use crate::kv::{KvStore, KvVisitor, MemoryKv, PutMode};
pub use crate::message::{Element, Message};
pub use crate::schema::{Schema, Syntax};
pub use faro_types::{FaroError, Guid, Result, GUID_SIZE};
