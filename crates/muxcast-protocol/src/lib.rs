//! Wire-level building blocks for muxcast.
//!
//! This crate defines the identifiers and the one custom XML element that
//! appear on the wire:
//!
//! - **Identifiers** ([`ChannelId`], [`RoomAddress`]) — how a logical
//!   channel maps onto a MUC room.
//! - **Codec** ([`MsgPayload`]) — the `<msg>` payload element carried in
//!   groupchat messages.
//! - **Errors** ([`ProtocolError`]) — what can go wrong while parsing
//!   either of them.
//!
//! The crate knows nothing about connections or rooms; it only converts
//! between Rust values and their wire representation.

mod error;
mod id;
mod room;
mod stanza;

pub use error::ProtocolError;
pub use id::ChannelId;
pub use room::{random_nick, RoomAddress};
pub use stanza::{MsgPayload, MSG_TAG, XMLNS};
