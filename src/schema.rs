//! Attribute schema registry.
//!
//! The engine only needs a narrow slice of schema behaviour: a
//! per-attribute value canonicaliser, an LDIF-style writer for
//! diagnostics, and the two indexing flags. Unknown attributes fall
//! back to case-ignore string handling.

use faro_types::{FaroError, Guid, Result, GUID_SIZE};
use std::collections::HashMap;

/// The attribute participates in equality indexing.
pub const ATTR_INDEXED: u32 = 1 << 0;
/// At most one entry in the database may carry any given value.
pub const ATTR_UNIQUE_INDEX: u32 = 1 << 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Syntax {
    CaseIgnoreString,
    OctetString,
    Guid,
}

impl Syntax {
    /// Normalise a value for index-key construction and comparison.
    ///
    /// Canonicalisation may be refused: a case-ignore value containing
    /// a wildcard has no canonical form (it is a pattern, not a value)
    /// and a GUID must reduce to exactly 16 bytes.
    pub fn canonicalise(&self, value: &[u8]) -> Result<Vec<u8>> {
        match self {
            Syntax::CaseIgnoreString => {
                if value.contains(&b'*') {
                    return Err(FaroError::Operations(
                        "cannot canonicalise a value containing a wildcard".into(),
                    ));
                }
                let text = std::str::from_utf8(value).map_err(|_| {
                    FaroError::Operations("case-ignore value is not valid UTF-8".into())
                })?;
                Ok(text.trim().to_ascii_lowercase().into_bytes())
            }
            Syntax::OctetString => Ok(value.to_vec()),
            Syntax::Guid => {
                if value.len() == GUID_SIZE {
                    return Ok(value.to_vec());
                }
                let text = std::str::from_utf8(value)
                    .map_err(|_| FaroError::Operations("GUID value is not valid UTF-8".into()))?;
                let guid: Guid = text
                    .parse()
                    .map_err(|_| FaroError::Operations(format!("bad GUID value: {text}")))?;
                Ok(guid.as_bytes().to_vec())
            }
        }
    }

    /// Human-readable rendering for log messages.
    pub fn ldif_write(&self, value: &[u8]) -> String {
        match self {
            Syntax::Guid => match Guid::from_slice(value) {
                Ok(guid) => guid.to_string(),
                Err(_) => String::from_utf8_lossy(value).into_owned(),
            },
            _ => String::from_utf8_lossy(value).into_owned(),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct AttributeSchema {
    pub syntax: Syntax,
    pub flags: u32,
}

#[derive(Default)]
pub struct Schema {
    attributes: HashMap<String, AttributeSchema>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, syntax: Syntax, flags: u32) {
        self.attributes
            .insert(attr_casefold(name), AttributeSchema { syntax, flags });
    }

    pub fn attribute_by_name(&self, name: &str) -> Option<&AttributeSchema> {
        self.attributes.get(&attr_casefold(name))
    }

    pub fn syntax_for(&self, name: &str) -> Syntax {
        self.attribute_by_name(name)
            .map(|a| a.syntax)
            .unwrap_or(Syntax::CaseIgnoreString)
    }

    pub fn flags_for(&self, name: &str) -> u32 {
        self.attribute_by_name(name).map(|a| a.flags).unwrap_or(0)
    }
}

/// Case-folded form of an attribute name, used in index keys.
pub fn attr_casefold(name: &str) -> String {
    name.to_ascii_lowercase()
}

/// True for the `dn` pseudo-attribute, which addresses the entry name
/// rather than a stored element.
pub fn attr_is_dn(name: &str) -> bool {
    name.eq_ignore_ascii_case("dn") || name.eq_ignore_ascii_case("distinguishedName")
}

/// Whether a canonical value must be base64-armoured before it can be
/// embedded in an index-record name. Anything outside printable ASCII,
/// or positioned whitespace/marker bytes that the DN syntax would eat,
/// forces armouring.
pub fn needs_base64(value: &[u8]) -> bool {
    let Some(&first) = value.first() else {
        return false;
    };
    if first == b' ' || first == b':' || first == b'<' {
        return true;
    }
    if value.last() == Some(&b' ') {
        return true;
    }
    value.iter().any(|&b| !(0x20..=0x7e).contains(&b))
}
