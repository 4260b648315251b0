//! Room engine: per-channel MUC subscriptions over a shared session.
//!
//! [`MucClient`] keeps a registry of [`RoomChannel`]s keyed by room address.
//! Each channel runs its own join state machine and sender worker; the
//! [`Refresher`] periodically reconnects the session and re-joins the rooms
//! embedders expect to stay subscribed to.
//!
//! Delivery is injected: channel creation asks a factory closure for a
//! [`MessageSink`], so the engine never knows whether payloads end up in a
//! receive buffer, a callback, or something else entirely.

mod channel;
mod client;
mod refresher;
mod wire;

pub use channel::RoomChannel;
pub use client::MucClient;
pub use refresher::Refresher;

use std::sync::Arc;

use muxcast_protocol::ChannelId;

/// Destination for payloads received on a channel.
pub trait MessageSink: Send + Sync + 'static {
    /// Called once per valid payload received on the channel's room.
    fn deliver(&self, payload: Vec<u8>);
}

impl<F> MessageSink for F
where
    F: Fn(Vec<u8>) + Send + Sync + 'static,
{
    fn deliver(&self, payload: Vec<u8>) {
        self(payload)
    }
}

/// Factory producing the sink wired into newly created channels.
pub type SinkFactory = Box<dyn Fn(&ChannelId) -> Arc<dyn MessageSink> + Send + Sync>;
