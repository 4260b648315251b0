//! The custom payload element.
//!
//! Relayed messages carry their opaque payload inside a
//! `<msg xmlns="https://xaya.io/xmppbroadcast">` extension attached to the
//! groupchat message. The element content is the base64 of the raw payload
//! bytes, so arbitrary binary survives the trip through XML.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use minidom::{Element, Node};

use crate::ProtocolError;

/// XML namespace of muxcast's stanza extensions.
pub const XMLNS: &str = "https://xaya.io/xmppbroadcast";

/// Local name of the payload element.
pub const MSG_TAG: &str = "msg";

/// An opaque payload carried in a `<msg>` element.
///
/// A value of this type always holds a successfully decoded payload; a
/// malformed element never becomes a `MsgPayload` ([`from_element`] fails
/// instead), so there is no invalid state that could accidentally be
/// serialized.
///
/// [`from_element`]: Self::from_element
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct MsgPayload {
    data: Vec<u8>,
}

impl MsgPayload {
    /// Wraps payload bytes for sending.
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// The payload bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Consumes the payload, returning the bytes.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Serializes into the `<msg>` element form.
    pub fn to_element(&self) -> Element {
        Element::builder(MSG_TAG, XMLNS)
            .append(Node::Text(STANDARD.encode(&self.data)))
            .build()
    }

    /// Parses a received payload element.
    ///
    /// Attributes other than the namespace are ignored, per the wire
    /// contract. Fails if the element is not a `<msg>` in our namespace or
    /// if its content is not valid base64.
    pub fn from_element(element: &Element) -> Result<Self, ProtocolError> {
        if !element.is(MSG_TAG, XMLNS) {
            return Err(ProtocolError::UnexpectedElement {
                name: element.name().to_string(),
            });
        }
        let data = STANDARD
            .decode(element.text())
            .map_err(ProtocolError::PayloadDecode)?;
        Ok(Self { data })
    }
}
