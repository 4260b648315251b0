//! Assembly of the MUC stanzas the engine sends.

use minidom::Element;
use xmpp_parsers::ns;

use muxcast_protocol::{MsgPayload, RoomAddress};

/// Directed presence that joins `room` under `nick`.
pub(crate) fn join_presence(room: &RoomAddress, nick: &str) -> Element {
    Element::builder("presence", ns::DEFAULT_NS)
        .attr("to", room.occupant(nick))
        .append(Element::builder("x", ns::MUC).build())
        .build()
}

/// Unavailable presence that leaves the room.
pub(crate) fn leave_presence(room: &RoomAddress, nick: &str) -> Element {
    Element::builder("presence", ns::DEFAULT_NS)
        .attr("to", room.occupant(nick))
        .attr("type", "unavailable")
        .build()
}

/// Groupchat message to the room carrying one payload element.
pub(crate) fn payload_message(room: &RoomAddress, payload: &MsgPayload) -> Element {
    Element::builder("message", ns::DEFAULT_NS)
        .attr("to", room.as_str())
        .attr("type", "groupchat")
        .append(payload.to_element())
        .build()
}

/// Owner IQ accepting the default configuration of a just-created room.
///
/// MUC services lock newly created rooms until the creator either submits
/// a configuration or accepts the defaults; sending an empty submit form
/// requests an "instant room".
pub(crate) fn instant_room_request(room: &RoomAddress, id: &str) -> Element {
    let form = Element::builder("x", ns::DATA_FORMS)
        .attr("type", "submit")
        .build();
    let query = Element::builder("query", "http://jabber.org/protocol/muc#owner")
        .append(form)
        .build();
    Element::builder("iq", ns::DEFAULT_NS)
        .attr("to", room.as_str())
        .attr("id", id)
        .attr("type", "set")
        .append(query)
        .build()
}
