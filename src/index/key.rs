//! Index record key construction.
//!
//! The storage name of an index record is synthesised from the
//! attribute and the canonical value. The separator scheme is part of
//! the on-disk format and must never change:
//!
//! ```text
//! @INDEX:<attr>:<value>           untruncated, raw
//! @INDEX:<attr>::<b64>            untruncated, base64
//! @INDEX#<attr>#<value-prefix>    truncated, raw
//! @INDEX#<attr>##<b64-prefix>     truncated, base64
//! ```
//!
//! Keys that would exceed the backing store's limit are truncated and
//! moved into the `#`-separated namespace, so a truncated key can
//! never collide with an untruncated key whose value happens to equal
//! the truncated prefix.

use crate::index::dn_list::IndexMode;
use crate::index::{IDXDN, IDXONE, INDEX};
use crate::schema::{attr_casefold, needs_base64, AttributeSchema, Schema};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use faro_types::{FaroError, Result};

/// Reserved for the storage-key wrapper around the record name.
const KEY_WRAPPER_LEN: usize = 4;
/// Worst-case separator count, used for the viability check.
const MAX_SEPARATORS: usize = 3;
const MIN_DATA: usize = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexKey {
    /// Synthesised record name, e.g. `@INDEX:cn:alice`.
    pub dn: String,
    pub truncated: bool,
}

/// Build the index record name for an (attribute, value) pair.
///
/// Returns the key and, for schema attributes, the attribute schema so
/// callers can inspect the indexing flags without a second lookup.
/// Canonicalisation failures (e.g. wildcard values) propagate.
pub fn index_key(
    schema: &Schema,
    mode: IndexMode,
    max_key_length: usize,
    attr: &str,
    value: &[u8],
) -> Result<(IndexKey, Option<AttributeSchema>)> {
    let max_key_length = if max_key_length == 0 {
        usize::MAX
    } else {
        max_key_length
    };

    let (attr_for_dn, canonical, attr_schema) = if attr.starts_with('@') {
        (attr.to_string(), value.to_vec(), None)
    } else {
        let folded = attr_casefold(attr);
        let attr_schema = schema.attribute_by_name(attr).copied();
        let canonical = schema.syntax_for(attr).canonicalise(value).map_err(|e| {
            FaroError::Operations(format!("failed to create index key for '{attr}': {e}"))
        })?;
        (folded, canonical, attr_schema)
    };

    let attr_len = attr_for_dn.len();
    let min_key_length = KEY_WRAPPER_LEN + INDEX.len() + MAX_SEPARATORS + MIN_DATA;
    if max_key_length.saturating_sub(attr_len) < min_key_length {
        return Err(FaroError::Operations(format!(
            "max_key_length {max_key_length} cannot fit an index key for '{attr_for_dn}'"
        )));
    }
    let max_avail = max_key_length - KEY_WRAPPER_LEN;

    let should_b64 = match mode {
        // DNs in keys are already case folded and linearised, which
        // excludes every byte the armouring exists for.
        IndexMode::Guid if attr == IDXDN || attr == IDXONE => false,
        _ => needs_base64(&canonical),
    };

    let key = if should_b64 {
        let encoded = BASE64.encode(&canonical);
        let key_len = MAX_SEPARATORS + INDEX.len() + attr_len + encoded.len();
        if key_len > max_avail {
            let keep = encoded.len() - (key_len - max_avail);
            IndexKey {
                dn: format!("{INDEX}#{attr_for_dn}##{}", truncate_str(&encoded, keep)),
                truncated: true,
            }
        } else {
            IndexKey {
                dn: format!("{INDEX}:{attr_for_dn}::{encoded}"),
                truncated: false,
            }
        }
    } else {
        let text = std::str::from_utf8(&canonical).map_err(|_| {
            FaroError::Operations(format!(
                "index value for '{attr_for_dn}' is not valid UTF-8"
            ))
        })?;
        let num_separators = 2;
        let key_len = num_separators + INDEX.len() + attr_len + text.len();
        if key_len > max_avail {
            let keep = text.len() - (key_len - max_avail);
            IndexKey {
                dn: format!("{INDEX}#{attr_for_dn}#{}", truncate_str(text, keep)),
                truncated: true,
            }
        } else {
            IndexKey {
                dn: format!("{INDEX}:{attr_for_dn}:{text}"),
                truncated: false,
            }
        }
    };

    Ok((key, attr_schema))
}

/// Byte-length truncation that respects char boundaries.
fn truncate_str(text: &str, mut len: usize) -> &str {
    if len >= text.len() {
        return text;
    }
    while len > 0 && !text.is_char_boundary(len) {
        len -= 1;
    }
    &text[..len]
}
