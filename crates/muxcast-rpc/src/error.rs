//! Error types for the RPC server.

/// Errors starting the RPC server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// `start` was called while the server is already running.
    #[error("server is already started")]
    AlreadyStarted,

    /// The RPC port could not be bound.
    #[error("failed to bind RPC port: {0}")]
    Bind(#[source] std::io::Error),
}
