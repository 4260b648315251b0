//! JSON-RPC facade for muxcast.
//!
//! [`BroadcastServer`] runs the whole relay: the XMPP session, the room
//! engine, the refresher and a JSON-RPC 2.0 endpoint that local processes
//! use to participate in channels without speaking XMPP themselves.
//! Received payloads land in per-channel [`ReceiveBuffer`]s that clients
//! drain with long-polling `receive` calls.

mod buffer;
mod error;
mod server;

pub use buffer::ReceiveBuffer;
pub use error::ServerError;
pub use server::{BroadcastServer, ServerConfig};
