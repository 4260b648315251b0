//! XMPP session layer for muxcast.
//!
//! [`XmppSession`] owns the single authenticated connection to the XMPP
//! server. The [`Session`] trait is the seam the room engine is written
//! against, so tests can drive the engine with a recording stub instead of
//! a live server — the same role the transport traits play in a game
//! backend.

#![allow(async_fn_in_trait)]

mod error;
mod session;

pub use error::SessionError;
pub use session::{SessionConfig, XmppSession};

use minidom::Element;

/// Why a session became disconnected.
///
/// The reason is threaded from the caller into the disconnect handling, so
/// explicit teardown and network loss are distinguished without probing the
/// connection state mid-teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `disconnect()` was called locally.
    Explicit,
    /// The server or the network ended the stream.
    Network(String),
}

/// Events emitted by a session, in stream order.
#[derive(Debug)]
pub enum SessionEvent {
    /// The connection is established and authenticated.
    Connected,
    /// The connection ended.
    Disconnected {
        /// Whether this was an explicit teardown or a network loss.
        reason: DisconnectReason,
    },
    /// An inbound stanza.
    Stanza(Element),
}

/// A long-lived XMPP session as seen by the room engine.
pub trait Session: Send + Sync + 'static {
    /// Snapshot of the connection state.
    fn is_connected(&self) -> bool;

    /// Queues a stanza for submission on the session's writer task.
    ///
    /// Never blocks. Stanzas queued while disconnected are dropped with a
    /// warning; callers that need delivery keep their own queues and check
    /// [`is_connected`](Self::is_connected) first.
    fn send_stanza(&self, stanza: Element) -> Result<(), SessionError>;

    /// Establishes the connection. Resolves `true` once the session is
    /// online and `false` if the attempt was refused.
    fn connect(&self) -> impl std::future::Future<Output = Result<bool, SessionError>> + Send;

    /// Explicit teardown. Emits a `Disconnected` event carrying
    /// [`DisconnectReason::Explicit`].
    fn disconnect(&self) -> impl std::future::Future<Output = Result<(), SessionError>> + Send;
}
