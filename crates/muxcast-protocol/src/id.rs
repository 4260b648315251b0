//! Channel identifiers.

use std::fmt;
use std::str::FromStr;

use crate::ProtocolError;

/// A 256-bit identifier for a logical message stream.
///
/// Rendered as 64 lowercase hex digits in room names and RPC parameters.
/// Equality is plain byte equality; the relay never interprets the value.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId([u8; 32]);

impl ChannelId {
    /// Parses an id from exactly 64 hex digits. Either case is accepted;
    /// the canonical rendering is lowercase.
    pub fn from_hex(s: &str) -> Result<Self, ProtocolError> {
        let mut bytes = [0u8; 32];
        if s.len() != 64 || hex::decode_to_slice(s, &mut bytes).is_err() {
            return Err(ProtocolError::InvalidChannelId(s.to_string()));
        }
        Ok(Self(bytes))
    }

    /// Wraps raw bytes as a channel id.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// The raw bytes of the id.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// The canonical lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for ChannelId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelId({})", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use sha2::{Digest, Sha256};

    fn hash_id(name: &str) -> ChannelId {
        ChannelId::from_bytes(Sha256::digest(name.as_bytes()).into())
    }

    #[test]
    fn test_hex_round_trip() {
        let id = hash_id("foo");
        let parsed = ChannelId::from_hex(&id.to_hex()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_uppercase_input_normalizes() {
        let id = hash_id("foo");
        let parsed = ChannelId::from_hex(&id.to_hex().to_uppercase()).unwrap();
        assert_eq!(id, parsed);
        assert_eq!(parsed.to_hex(), id.to_hex());
    }

    #[test]
    fn test_display_is_lowercase_hex() {
        let id = ChannelId::from_bytes([0xab; 32]);
        assert_eq!(id.to_string(), "ab".repeat(32));
    }

    #[test]
    fn test_rejects_wrong_length() {
        assert!(ChannelId::from_hex("").is_err());
        assert!(ChannelId::from_hex("ab").is_err());
        assert!(ChannelId::from_hex(&"ab".repeat(31)).is_err());
        assert!(ChannelId::from_hex(&"ab".repeat(33)).is_err());
    }

    #[test]
    fn test_rejects_non_hex() {
        let mut s = "ab".repeat(32);
        s.replace_range(0..1, "x");
        assert!(ChannelId::from_hex(&s).is_err());
    }

    #[test]
    fn test_from_str_matches_from_hex() {
        let hex = "00".repeat(32);
        let id: ChannelId = hex.parse().unwrap();
        assert_eq!(id, ChannelId::from_bytes([0; 32]));
    }

    #[test]
    fn test_works_as_map_key() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(hash_id("foo"), 1);
        map.insert(hash_id("bar"), 2);
        assert_eq!(map[&hash_id("foo")], 1);
        assert_eq!(map[&hash_id("bar")], 2);
    }
}
