//! # muxcast
//!
//! Broadcast relay that multiplexes per-channel message streams over XMPP
//! multi-user chat. Each 256-bit channel id maps onto one MUC room; peers
//! publish opaque payloads into the room and every participant receives
//! them.
//!
//! Two ways in:
//!
//! - [`Broadcast`] — embed the relay natively: send on one channel, get
//!   received payloads through a callback.
//! - [`BroadcastServer`](muxcast_rpc::BroadcastServer) — run the JSON-RPC
//!   server so local processes can `send`/`getseq`/`receive` over HTTP
//!   without speaking XMPP.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use muxcast::prelude::*;
//!
//! # async fn run() {
//! let config = BroadcastConfig::new(
//!     "mygame",
//!     "relay@xmpp.example.org",
//!     "password",
//!     "muc.xmpp.example.org",
//! );
//! let channel = ChannelId::from_bytes([0x42; 32]);
//! let bc = Broadcast::new(config, channel, |payload| {
//!     println!("received {} bytes", payload.len());
//! });
//! bc.start().await;
//! bc.send(b"hello".to_vec());
//! # }
//! ```

mod broadcast;

pub use broadcast::{Broadcast, BroadcastConfig};

/// Re-exports everything an embedder needs.
pub mod prelude {
    pub use crate::{Broadcast, BroadcastConfig};

    pub use muxcast_protocol::{ChannelId, MsgPayload, ProtocolError, RoomAddress};

    pub use muxcast_muc::{MessageSink, MucClient, Refresher, RoomChannel};

    pub use muxcast_rpc::{BroadcastServer, ReceiveBuffer, ServerConfig, ServerError};

    pub use muxcast_xmpp::{
        DisconnectReason, Session, SessionConfig, SessionError, SessionEvent, XmppSession,
    };
}
