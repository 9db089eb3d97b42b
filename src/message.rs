//! Stored entries and their wire form.
//!
//! A message is a DN plus an ordered list of multi-valued elements.
//! The packed form is a length-prefixed little-endian layout; values
//! are opaque byte strings.

use crate::dn::Dn;
use faro_types::{FaroError, Result};
use std::convert::TryInto;

/// Treat a unique-index violation on this element as fatal even when
/// the attribute schema does not flag it unique.
pub const ELEMENT_FORCE_UNIQUE: u32 = 1 << 0;
/// Permit an exact duplicate value on this element (single-value
/// checking disabled by the caller).
pub const ELEMENT_ALLOW_DUPLICATE: u32 = 1 << 1;

const PACK_FORMAT: u32 = 0x6661_726f;

#[derive(Debug, Clone)]
pub struct Element {
    pub name: String,
    pub values: Vec<Vec<u8>>,
    pub flags: u32,
}

impl Element {
    pub fn new(name: &str, values: Vec<Vec<u8>>) -> Self {
        Element {
            name: name.to_string(),
            values,
            flags: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    pub dn: Dn,
    pub elements: Vec<Element>,
}

impl Message {
    pub fn new(dn: Dn) -> Self {
        Message {
            dn,
            elements: Vec::new(),
        }
    }

    /// Append a value, creating the element on first use.
    pub fn add(&mut self, name: &str, value: &[u8]) {
        if let Some(el) = self
            .elements
            .iter_mut()
            .find(|el| el.name.eq_ignore_ascii_case(name))
        {
            el.values.push(value.to_vec());
            return;
        }
        self.elements.push(Element::new(name, vec![value.to_vec()]));
    }

    pub fn find_element(&self, name: &str) -> Option<&Element> {
        self.elements
            .iter()
            .find(|el| el.name.eq_ignore_ascii_case(name))
    }

    pub fn find_first_value(&self, name: &str) -> Option<&[u8]> {
        self.find_element(name)
            .and_then(|el| el.values.first())
            .map(|v| v.as_slice())
    }

    pub fn find_attr_as_str(&self, name: &str) -> Option<&str> {
        self.find_first_value(name)
            .and_then(|v| std::str::from_utf8(v).ok())
    }

    pub fn find_attr_as_u32(&self, name: &str, default: u32) -> u32 {
        self.find_attr_as_str(name)
            .and_then(|s| s.parse().ok())
            .unwrap_or(default)
    }

    pub fn find_attr_as_bool(&self, name: &str, default: bool) -> bool {
        match self.find_attr_as_str(name) {
            Some("1") | Some("true") | Some("TRUE") => true,
            Some("0") | Some("false") | Some("FALSE") => false,
            _ => default,
        }
    }

    pub fn pack(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&PACK_FORMAT.to_le_bytes());
        write_bytes(&mut buf, self.dn.linearized().as_bytes())?;
        let count: u32 = self
            .elements
            .len()
            .try_into()
            .map_err(|_| FaroError::Operations("too many elements to pack".into()))?;
        buf.extend_from_slice(&count.to_le_bytes());
        for el in &self.elements {
            if el.name.is_empty() {
                return Err(FaroError::Operations("element names must be non-empty".into()));
            }
            write_bytes(&mut buf, el.name.as_bytes())?;
            let values: u32 = el
                .values
                .len()
                .try_into()
                .map_err(|_| FaroError::Operations("too many values to pack".into()))?;
            buf.extend_from_slice(&values.to_le_bytes());
            for value in &el.values {
                write_bytes(&mut buf, value)?;
            }
        }
        Ok(buf)
    }

    pub fn unpack(data: &[u8]) -> Result<Message> {
        let mut cursor = Cursor { data, pos: 0 };
        let format = cursor.read_u32()?;
        if format != PACK_FORMAT {
            return Err(FaroError::Corruption(format!(
                "unknown record pack format {format:#x}"
            )));
        }
        let dn_bytes = cursor.read_bytes()?;
        let dn_text = std::str::from_utf8(dn_bytes)
            .map_err(|_| FaroError::Corruption("record DN is not valid UTF-8".into()))?;
        let dn = Dn::parse(dn_text)
            .map_err(|e| FaroError::Corruption(format!("record DN unparsable: {e}")))?;
        let count = cursor.read_u32()? as usize;
        let mut msg = Message::new(dn);
        for _ in 0..count {
            let name_bytes = cursor.read_bytes()?;
            let name = std::str::from_utf8(name_bytes)
                .map_err(|_| FaroError::Corruption("element name is not valid UTF-8".into()))?
                .to_string();
            let num_values = cursor.read_u32()? as usize;
            let mut values = Vec::with_capacity(num_values.min(1024));
            for _ in 0..num_values {
                values.push(cursor.read_bytes()?.to_vec());
            }
            msg.elements.push(Element {
                name,
                values,
                flags: 0,
            });
        }
        Ok(msg)
    }
}

fn write_bytes(buf: &mut Vec<u8>, bytes: &[u8]) -> Result<()> {
    let len: u32 = bytes
        .len()
        .try_into()
        .map_err(|_| FaroError::Operations("field length exceeds u32::MAX".into()))?;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(bytes);
    Ok(())
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn read_u32(&mut self) -> Result<u32> {
        let end = self.pos + 4;
        if end > self.data.len() {
            return Err(FaroError::Corruption("record truncated".into()));
        }
        let value = u32::from_le_bytes(self.data[self.pos..end].try_into().unwrap());
        self.pos = end;
        Ok(value)
    }

    fn read_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.read_u32()? as usize;
        let end = self.pos + len;
        if end > self.data.len() || end < self.pos {
            return Err(FaroError::Corruption("record truncated".into()));
        }
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_roundtrip() {
        let mut msg = Message::new(Dn::parse("CN=a,DC=x").unwrap());
        msg.add("cn", b"a");
        msg.add("member", b"CN=b,DC=x");
        msg.add("member", b"CN=c,DC=x");
        let packed = msg.pack().unwrap();
        let back = Message::unpack(&packed).unwrap();
        assert_eq!(back.dn, msg.dn);
        assert_eq!(back.elements.len(), 2);
        assert_eq!(back.find_element("MEMBER").unwrap().values.len(), 2);
        assert_eq!(back.find_first_value("cn").unwrap(), b"a");
    }

    #[test]
    fn unpack_rejects_truncation() {
        let mut msg = Message::new(Dn::parse("CN=a").unwrap());
        msg.add("cn", b"a");
        let packed = msg.pack().unwrap();
        assert!(Message::unpack(&packed[..packed.len() - 3]).is_err());
        assert!(Message::unpack(&packed[..5]).is_err());
    }

    #[test]
    fn unpack_rejects_bad_format() {
        assert!(Message::unpack(&[0xde, 0xad, 0xbe, 0xef, 0, 0, 0, 0]).is_err());
    }

    #[test]
    fn attr_helpers() {
        let mut msg = Message::new(Dn::parse("@INDEXLIST").unwrap());
        msg.add("@IDXVERSION", b"3");
        msg.add("@IDXONE", b"1");
        assert_eq!(msg.find_attr_as_u32("@IDXVERSION", 0), 3);
        assert!(msg.find_attr_as_bool("@IDXONE", false));
        assert!(!msg.find_attr_as_bool("missing", false));
    }
}
