#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

/// Size in bytes of a raw entry GUID.
pub const GUID_SIZE: usize = 16;

#[derive(thiserror::Error, Debug)]
pub enum FaroError {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupted index: {0}")]
    Corruption(String),
    #[error("operations error: {0}")]
    Operations(String),
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
    #[error("unwilling to perform: {0}")]
    Unwilling(&'static str),
    #[error("invalid DN: {0}")]
    InvalidDn(String),
    #[error("{0} not found")]
    NotFound(&'static str),
}

pub type Result<T> = std::result::Result<T, FaroError>;

/// A fixed 16-byte entry identifier, stored raw and compared bytewise.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct Guid(pub [u8; GUID_SIZE]);

impl Guid {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let raw: [u8; GUID_SIZE] = bytes
            .try_into()
            .map_err(|_| FaroError::Operations(format!("GUID must be {GUID_SIZE} bytes")))?;
        Ok(Guid(raw))
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7], b[8], b[9], b[10], b[11], b[12], b[13],
            b[14], b[15]
        )
    }
}

impl FromStr for Guid {
    type Err = FaroError;

    fn from_str(s: &str) -> Result<Self> {
        let hex: String = s.chars().filter(|c| *c != '-').collect();
        if hex.len() != GUID_SIZE * 2 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(FaroError::InvalidDn(format!("bad GUID literal: {s}")));
        }
        let mut raw = [0u8; GUID_SIZE];
        for (i, chunk) in raw.iter_mut().enumerate() {
            *chunk = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
                .map_err(|_| FaroError::InvalidDn(format!("bad GUID literal: {s}")))?;
        }
        Ok(Guid(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guid_display_roundtrip() {
        let g = Guid([
            0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef, 0x00, 0x11, 0x22, 0x33, 0x44, 0x55,
            0x66, 0x77,
        ]);
        let text = g.to_string();
        assert_eq!(text, "01234567-89ab-cdef-0011-223344556677");
        assert_eq!(text.parse::<Guid>().unwrap(), g);
    }

    #[test]
    fn guid_from_slice_rejects_short() {
        assert!(Guid::from_slice(&[0u8; 15]).is_err());
    }

    #[test]
    fn guid_parse_rejects_junk() {
        assert!("not-a-guid".parse::<Guid>().is_err());
    }
}
