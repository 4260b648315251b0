//! Room addressing.
//!
//! Every channel is bound to exactly one MUC room whose address is a pure
//! function of the game id, the channel id and the MUC service.

use std::fmt;

use rand::Rng;

use crate::ChannelId;

/// The bare address of the MUC room backing a channel:
/// `<game>_<channel-hex>@<service>`.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct RoomAddress(String);

impl RoomAddress {
    /// Derives the room address for a channel.
    pub fn derive(game_id: &str, channel: &ChannelId, muc_service: &str) -> Self {
        Self(format!("{}_{}@{}", game_id, channel.to_hex(), muc_service))
    }

    /// The bare address as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The occupant address `room/nick` used for joins and leaves.
    pub fn occupant(&self, nick: &str) -> String {
        format!("{}/{}", self.0, nick)
    }
}

impl fmt::Display for RoomAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A fresh random occupant nick.
///
/// Nicks carry no meaning here; they only have to be unique within the room
/// so the join is not refused. 256 random bits rendered as hex make a
/// collision all but impossible.
pub fn random_nick() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derivation_format() {
        let id = ChannelId::from_bytes([0x42; 32]);
        let room = RoomAddress::derive("test", &id, "muc.example.org");
        assert_eq!(
            room.as_str(),
            format!("test_{}@muc.example.org", "42".repeat(32))
        );
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let id = ChannelId::from_bytes([7; 32]);
        let a = RoomAddress::derive("game", &id, "muc.host");
        let b = RoomAddress::derive("game", &id, "muc.host");
        assert_eq!(a, b);
    }

    #[test]
    fn test_different_channels_different_rooms() {
        let a = RoomAddress::derive("game", &ChannelId::from_bytes([1; 32]), "muc.host");
        let b = RoomAddress::derive("game", &ChannelId::from_bytes([2; 32]), "muc.host");
        assert_ne!(a, b);
    }

    #[test]
    fn test_occupant_address() {
        let id = ChannelId::from_bytes([0; 32]);
        let room = RoomAddress::derive("g", &id, "muc.host");
        let occupant = room.occupant("nick123");
        assert_eq!(occupant, format!("{}/nick123", room.as_str()));
    }

    #[test]
    fn test_random_nick_shape() {
        let nick = random_nick();
        assert_eq!(nick.len(), 64);
        assert!(nick.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_random_nicks_differ() {
        assert_ne!(random_nick(), random_nick());
    }
}
