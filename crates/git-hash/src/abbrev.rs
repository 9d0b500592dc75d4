use std::fmt;

use crate::hex::hex_to_string;
use crate::{HashError, ObjectId};

/// A prefix of an [`ObjectId`]'s hex representation, carrying its length in nibbles.
///
/// Used wherever a caller deals in partial hashes: abbreviated output (`git log
/// --abbrev`) and prefix lookups against a pack index or object database.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct AbbreviatedObjectId {
    /// Full-length hex digits; only the first `len` are significant.
    hex: String,
    len: usize,
}

impl AbbreviatedObjectId {
    /// Minimum prefix length accepted, matching git's own floor.
    pub const MIN_LEN: usize = 4;

    /// Abbreviate `id` to `len` hex nibbles (clamped to the id's own hex length).
    pub fn new(id: &ObjectId, len: usize) -> Self {
        let hex = hex_to_string(id.as_bytes());
        let len = len.min(hex.len());
        Self { hex, len }
    }

    /// Parse a bare hex prefix string (4..=full length) with no algorithm hint.
    pub fn from_hex_prefix(s: &str) -> Result<Self, HashError> {
        if s.len() < Self::MIN_LEN {
            return Err(HashError::InvalidHexLength {
                expected: Self::MIN_LEN,
                actual: s.len(),
            });
        }
        if !crate::hex::is_valid_hex_prefix(s) {
            return Err(HashError::InvalidHex {
                position: 0,
                character: s.chars().find(|c| !c.is_ascii_hexdigit()).unwrap_or('?'),
            });
        }
        Ok(Self {
            hex: s.to_ascii_lowercase(),
            len: s.len(),
        })
    }

    /// The number of significant hex nibbles.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The prefix as a hex string.
    pub fn as_str(&self) -> &str {
        &self.hex[..self.len]
    }

    /// Whether this prefix is the full hash (no shorter than the underlying algorithm's hex length).
    pub fn is_full(&self) -> bool {
        self.len == self.hex.len()
    }

    /// Check whether `id` begins with this prefix.
    pub fn matches(&self, id: &ObjectId) -> bool {
        let full = hex_to_string(id.as_bytes());
        full.len() >= self.len && full[..self.len].eq_ignore_ascii_case(self.as_str())
    }
}

impl fmt::Display for AbbreviatedObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for AbbreviatedObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AbbreviatedObjectId({})", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHA1_HEX: &str = "da39a3ee5e6b4b0d3255bfef95601890afd80709";

    #[test]
    fn abbreviate_and_match() {
        let id = ObjectId::from_hex(SHA1_HEX).unwrap();
        let abbrev = AbbreviatedObjectId::new(&id, 8);
        assert_eq!(abbrev.as_str(), "da39a3ee");
        assert!(abbrev.matches(&id));
    }

    #[test]
    fn non_matching_prefix() {
        let id = ObjectId::from_hex(SHA1_HEX).unwrap();
        let other = ObjectId::from_hex("0000000000000000000000000000000000000000").unwrap();
        let abbrev = AbbreviatedObjectId::new(&id, 8);
        assert!(!abbrev.matches(&other));
    }

    #[test]
    fn from_hex_prefix_too_short() {
        assert!(AbbreviatedObjectId::from_hex_prefix("abc").is_err());
    }

    #[test]
    fn from_hex_prefix_case_insensitive() {
        let a = AbbreviatedObjectId::from_hex_prefix("DA39A3EE").unwrap();
        let id = ObjectId::from_hex(SHA1_HEX).unwrap();
        assert!(a.matches(&id));
    }

    #[test]
    fn is_full_when_len_matches_hash() {
        let id = ObjectId::from_hex(SHA1_HEX).unwrap();
        let abbrev = AbbreviatedObjectId::new(&id, 40);
        assert!(abbrev.is_full());
        let short = AbbreviatedObjectId::new(&id, 8);
        assert!(!short.is_full());
    }
}
