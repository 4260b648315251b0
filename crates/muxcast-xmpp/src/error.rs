//! Error types for the session layer.

/// Errors surfaced by the session layer.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Root CA configuration was attempted after the session connected.
    #[error("session is already connected")]
    AlreadyConnected,

    /// The session actor has shut down and can take no more requests.
    #[error("session task is gone")]
    SessionGone,
}
