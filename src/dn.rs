//! Distinguished names: parsing, linearisation and case folding.
//!
//! A DN is a comma-separated chain of `attr=value` components, leaf
//! first (`CN=a,DC=x`). Names starting with `@` are special control
//! records (`@INDEXLIST`, `@BASEINFO`, index records); they carry no
//! components and are never case folded. A DN may be prefixed with
//! angle-bracketed extended components (`<GUID=...>;CN=a,DC=x`) that
//! carry out-of-band identifiers and do not take part in equality.

use faro_types::{FaroError, Guid, Result};
use std::fmt;

#[derive(Debug, Clone)]
pub struct Dn {
    linearized: String,
    components: Vec<(String, String)>,
    extended: Vec<(String, Vec<u8>)>,
    special: bool,
}

impl Dn {
    /// The empty DN, parent of every single-component name.
    pub fn empty() -> Self {
        Dn {
            linearized: String::new(),
            components: Vec::new(),
            extended: Vec::new(),
            special: false,
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Dn::empty());
        }
        if text.starts_with('@') {
            return Ok(Dn {
                linearized: text.to_string(),
                components: Vec::new(),
                extended: Vec::new(),
                special: true,
            });
        }

        let mut rest = text;
        let mut extended = Vec::new();
        while let Some(stripped) = rest.strip_prefix('<') {
            let end = stripped
                .find('>')
                .ok_or_else(|| FaroError::InvalidDn(format!("unterminated extended component in {text}")))?;
            let inner = &stripped[..end];
            let (name, value) = inner
                .split_once('=')
                .ok_or_else(|| FaroError::InvalidDn(format!("malformed extended component in {text}")))?;
            let bytes = match value.parse::<Guid>() {
                Ok(guid) => guid.as_bytes().to_vec(),
                Err(_) => value.as_bytes().to_vec(),
            };
            extended.push((name.to_string(), bytes));
            rest = stripped[end + 1..].trim_start_matches(';');
        }

        if rest.is_empty() {
            return Err(FaroError::InvalidDn(format!("no components in {text}")));
        }

        let mut components = Vec::new();
        for rdn in rest.split(',') {
            let rdn = rdn.trim();
            let (attr, value) = rdn
                .split_once('=')
                .ok_or_else(|| FaroError::InvalidDn(format!("component without '=' in {text}")))?;
            if attr.is_empty() || attr.contains('<') || attr.contains('>') {
                return Err(FaroError::InvalidDn(format!("bad attribute name in {text}")));
            }
            components.push((attr.to_string(), value.to_string()));
        }

        let linearized = components
            .iter()
            .map(|(a, v)| format!("{a}={v}"))
            .collect::<Vec<_>>()
            .join(",");

        Ok(Dn {
            linearized,
            components,
            extended,
            special: false,
        })
    }

    /// The text form without extended components.
    pub fn linearized(&self) -> &str {
        &self.linearized
    }

    /// Case-folded form used in storage keys and as the DN-mode entry
    /// id. Special names are already canonical and fold to themselves.
    pub fn casefold(&self) -> String {
        if self.special {
            self.linearized.clone()
        } else {
            self.linearized.to_ascii_uppercase()
        }
    }

    pub fn is_special(&self) -> bool {
        self.special
    }

    pub fn is_empty(&self) -> bool {
        !self.special && self.components.is_empty()
    }

    pub fn num_components(&self) -> usize {
        self.components.len()
    }

    /// Parent DN, dropping the leaf component. Special and empty names
    /// have no parent.
    pub fn parent(&self) -> Option<Dn> {
        if self.special || self.components.is_empty() {
            return None;
        }
        let components: Vec<_> = self.components[1..].to_vec();
        let linearized = components
            .iter()
            .map(|(a, v)| format!("{a}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        Some(Dn {
            linearized,
            components,
            extended: Vec::new(),
            special: false,
        })
    }

    pub fn extended_component(&self, name: &str) -> Option<&[u8]> {
        self.extended
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
    }

    pub fn set_extended_component(&mut self, name: &str, value: &[u8]) {
        self.extended.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.extended.push((name.to_string(), value.to_vec()));
    }

    /// True when `self` is `base` or lives underneath it. The empty
    /// base is an ancestor of everything.
    pub fn is_descendant_of(&self, base: &Dn) -> bool {
        if self.special {
            return false;
        }
        if base.is_empty() {
            return true;
        }
        let own = self.casefold();
        let anc = base.casefold();
        if own == anc {
            return true;
        }
        own.ends_with(&anc) && own.as_bytes()[own.len() - anc.len() - 1] == b','
    }
}

impl PartialEq for Dn {
    fn eq(&self, other: &Self) -> bool {
        self.special == other.special && self.casefold() == other.casefold()
    }
}

impl Eq for Dn {}

impl fmt::Display for Dn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.linearized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_linearize() {
        let dn = Dn::parse("CN=a, DC=x").unwrap();
        assert_eq!(dn.linearized(), "CN=a,DC=x");
        assert_eq!(dn.casefold(), "CN=A,DC=X");
        assert_eq!(dn.num_components(), 2);
    }

    #[test]
    fn special_names_do_not_fold() {
        let dn = Dn::parse("@INDEX:cn:a").unwrap();
        assert!(dn.is_special());
        assert_eq!(dn.casefold(), "@INDEX:cn:a");
        assert!(dn.parent().is_none());
    }

    #[test]
    fn parent_chain_ends_at_empty() {
        let dn = Dn::parse("CN=a,DC=x").unwrap();
        let parent = dn.parent().unwrap();
        assert_eq!(parent.linearized(), "DC=x");
        let root = parent.parent().unwrap();
        assert!(root.is_empty());
        assert!(root.parent().is_none());
    }

    #[test]
    fn extended_component_roundtrip() {
        let dn = Dn::parse("<GUID=01234567-89ab-cdef-0011-223344556677>;CN=a,DC=x").unwrap();
        let guid = dn.extended_component("guid").unwrap();
        assert_eq!(guid.len(), 16);
        assert_eq!(dn.linearized(), "CN=a,DC=x");
    }

    #[test]
    fn descendants() {
        let base = Dn::parse("DC=x").unwrap();
        assert!(Dn::parse("CN=a,DC=x").unwrap().is_descendant_of(&base));
        assert!(Dn::parse("DC=x").unwrap().is_descendant_of(&base));
        assert!(!Dn::parse("CN=a,DC=y").unwrap().is_descendant_of(&base));
        // suffix match must respect the component boundary
        assert!(!Dn::parse("CN=a,DC=xx").unwrap().is_descendant_of(&base));
        assert!(Dn::parse("DC=anything").unwrap().is_descendant_of(&Dn::empty()));
    }

    #[test]
    fn equality_is_case_insensitive() {
        assert_eq!(Dn::parse("cn=A,dc=X").unwrap(), Dn::parse("CN=a,DC=x").unwrap());
        assert_ne!(Dn::parse("cn=A").unwrap(), Dn::parse("cn=B").unwrap());
    }

    #[test]
    fn rejects_malformed() {
        assert!(Dn::parse("no-equals-sign").is_err());
        assert!(Dn::parse("<GUID=0123>;").is_err());
    }
}
