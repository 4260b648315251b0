//! Error types for the protocol layer.

/// Errors produced when parsing wire-level inputs.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The string is not a 64-digit hex channel id.
    #[error("invalid channel id: {0:?}")]
    InvalidChannelId(String),

    /// A payload element's content was not valid base64.
    #[error("payload decode failed: {0}")]
    PayloadDecode(#[source] base64::DecodeError),

    /// Some other element was handed to the payload codec.
    #[error("unexpected element <{name}>")]
    UnexpectedElement {
        /// Local name of the offending element.
        name: String,
    },
}
