//! Integration tests for the room engine, driven through a recording stub
//! session instead of a live XMPP server.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use minidom::Element;
use tokio::sync::mpsc;

use muxcast_muc::{MessageSink, MucClient, Refresher};
use muxcast_protocol::{ChannelId, MsgPayload, RoomAddress, MSG_TAG, XMLNS};
use muxcast_xmpp::{DisconnectReason, Session, SessionError, SessionEvent};

const GAME_ID: &str = "test";
const MUC_SERVICE: &str = "muc.example.org";
const MUC_USER_NS: &str = "http://jabber.org/protocol/muc#user";

// =========================================================================
// Stub session: records sent stanzas instead of talking to a server.
// =========================================================================

#[derive(Default)]
struct StubSession {
    connected: AtomicBool,
    connects: AtomicUsize,
    sent: Mutex<Vec<Element>>,
}

impl StubSession {
    fn online() -> Arc<Self> {
        let stub = Self::default();
        stub.connected.store(true, Ordering::SeqCst);
        Arc::new(stub)
    }

    fn offline() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn sent(&self) -> Vec<Element> {
        self.sent.lock().unwrap().clone()
    }

    fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl Session for StubSession {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn send_stanza(&self, stanza: Element) -> Result<(), SessionError> {
        self.sent.lock().unwrap().push(stanza);
        Ok(())
    }

    async fn connect(&self) -> Result<bool, SessionError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
        Ok(true)
    }

    async fn disconnect(&self) -> Result<(), SessionError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Sink collecting every delivered payload.
#[derive(Default, Clone)]
struct Captured(Arc<Mutex<Vec<Vec<u8>>>>);

impl Captured {
    fn payloads(&self) -> Vec<Vec<u8>> {
        self.0.lock().unwrap().clone()
    }
}

impl MessageSink for Captured {
    fn deliver(&self, payload: Vec<u8>) {
        self.0.lock().unwrap().push(payload);
    }
}

// =========================================================================
// Helpers
// =========================================================================

fn new_client(
    session: Arc<StubSession>,
) -> (
    Arc<MucClient<StubSession>>,
    mpsc::UnboundedSender<SessionEvent>,
    Captured,
) {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let captured = Captured::default();
    let sink = captured.clone();
    let client = MucClient::new(
        session,
        events_rx,
        GAME_ID,
        MUC_SERVICE,
        move |_: &ChannelId| -> Arc<dyn MessageSink> { Arc::new(sink.clone()) },
    );
    (client, events_tx, captured)
}

fn channel_id(byte: u8) -> ChannelId {
    ChannelId::from_bytes([byte; 32])
}

fn room_for(id: &ChannelId) -> RoomAddress {
    RoomAddress::derive(GAME_ID, id, MUC_SERVICE)
}

/// The nick the client picked, read back from its join presence.
fn joined_nick(stanza: &Element) -> String {
    let to = stanza.attr("to").expect("join presence has no 'to'");
    to.split_once('/').expect("no occupant part").1.to_string()
}

fn join_presences(stanzas: &[Element]) -> Vec<&Element> {
    stanzas
        .iter()
        .filter(|s| s.name() == "presence" && s.attr("type").is_none())
        .collect()
}

fn leave_presences(stanzas: &[Element]) -> Vec<&Element> {
    stanzas
        .iter()
        .filter(|s| s.name() == "presence" && s.attr("type") == Some("unavailable"))
        .collect()
}

fn sent_messages(stanzas: &[Element]) -> Vec<&Element> {
    stanzas.iter().filter(|s| s.name() == "message").collect()
}

fn payload_of(message: &Element) -> Vec<u8> {
    let element = message
        .children()
        .find(|c| c.is(MSG_TAG, XMLNS))
        .expect("message without payload element");
    MsgPayload::from_element(element).unwrap().into_data()
}

/// Presence from an occupant of `room`, with the given MUC status codes.
fn presence_from(room: &RoomAddress, nick: &str, type_: Option<&str>, codes: &[u32]) -> Element {
    let mut x = Element::builder("x", MUC_USER_NS);
    for code in codes {
        x = x.append(
            Element::builder("status", MUC_USER_NS)
                .attr("code", code.to_string())
                .build(),
        );
    }
    let mut presence = Element::builder("presence", "jabber:client")
        .attr("from", room.occupant(nick))
        .append(x.build());
    if let Some(type_) = type_ {
        presence = presence.attr("type", type_);
    }
    presence.build()
}

/// Groupchat message from an occupant of `room` carrying one payload.
fn message_from(room: &RoomAddress, nick: &str, payload: &[u8]) -> Element {
    Element::builder("message", "jabber:client")
        .attr("from", room.occupant(nick))
        .attr("type", "groupchat")
        .append(MsgPayload::new(payload.to_vec()).to_element())
        .build()
}

async fn wait_for(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for: {what}");
}

/// Creates a channel and walks it through the join confirmation.
async fn joined_channel(
    client: &Arc<MucClient<StubSession>>,
    session: &Arc<StubSession>,
    events: &mpsc::UnboundedSender<SessionEvent>,
    id: &ChannelId,
) -> String {
    client.get_channel(id).expect("channel not created");
    let room = room_for(id);
    let sent = session.sent();
    let join = join_presences(&sent);
    let nick = joined_nick(join.last().unwrap());
    events
        .send(SessionEvent::Stanza(presence_from(
            &room,
            &nick,
            None,
            &[110],
        )))
        .unwrap();
    nick
}

// =========================================================================
// Channel creation and join
// =========================================================================

#[tokio::test]
async fn test_get_channel_while_disconnected_returns_none() {
    let (client, _events, _captured) = new_client(StubSession::offline());
    assert!(client.get_channel(&channel_id(1)).is_none());
}

#[tokio::test]
async fn test_get_channel_sends_join_presence() {
    let session = StubSession::online();
    let (client, _events, _captured) = new_client(Arc::clone(&session));

    let id = channel_id(1);
    let channel = client.get_channel(&id).unwrap();
    assert!(channel.is_active());
    assert_eq!(channel.room(), &room_for(&id));

    let sent = session.sent();
    assert_eq!(sent.len(), 1);
    let presence = &sent[0];
    assert_eq!(presence.name(), "presence");
    let to = presence.attr("to").unwrap();
    assert!(to.starts_with(room_for(&id).as_str()));
    assert!(presence
        .children()
        .any(|c| c.is("x", "http://jabber.org/protocol/muc")));

    // The nick is a fresh 256-bit hex value.
    let nick = joined_nick(presence);
    assert_eq!(nick.len(), 64);
}

#[tokio::test]
async fn test_repeated_lookup_reuses_the_channel() {
    let session = StubSession::online();
    let (client, _events, _captured) = new_client(Arc::clone(&session));

    let id = channel_id(1);
    let first = client.get_channel(&id).unwrap();
    let second = client.get_channel(&id).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(join_presences(&session.sent()).len(), 1);
}

#[tokio::test]
async fn test_join_confirmation_flushes_queue_in_order() {
    let session = StubSession::online();
    let (client, events, _captured) = new_client(Arc::clone(&session));

    let id = channel_id(1);
    let channel = client.get_channel(&id).unwrap();
    channel.send(b"one".to_vec());
    channel.send(b"two".to_vec());
    channel.send(b"three".to_vec());

    // Nothing is sent before the join is confirmed.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(sent_messages(&session.sent()).is_empty());

    let nick = joined_nick(&session.sent()[0]);
    events
        .send(SessionEvent::Stanza(presence_from(
            &room_for(&id),
            &nick,
            None,
            &[110],
        )))
        .unwrap();

    wait_for("queued payloads flushed", || {
        sent_messages(&session.sent()).len() == 3
    })
    .await;

    let sent = session.sent();
    let messages = sent_messages(&sent);
    assert_eq!(payload_of(messages[0]), b"one");
    assert_eq!(payload_of(messages[1]), b"two");
    assert_eq!(payload_of(messages[2]), b"three");
    for message in messages {
        assert_eq!(message.attr("type"), Some("groupchat"));
        assert_eq!(message.attr("to"), Some(room_for(&id).as_str()));
    }
}

#[tokio::test]
async fn test_send_after_join_is_delivered() {
    let session = StubSession::online();
    let (client, events, _captured) = new_client(Arc::clone(&session));

    let id = channel_id(1);
    joined_channel(&client, &session, &events, &id).await;
    let channel = client.get_channel(&id).unwrap();

    channel.send(b"later".to_vec());
    wait_for("payload sent", || {
        sent_messages(&session.sent()).len() == 1
    })
    .await;
    assert_eq!(payload_of(sent_messages(&session.sent())[0]), b"later");
}

#[tokio::test]
async fn test_room_creation_status_triggers_instant_room_request() {
    let session = StubSession::online();
    let (client, events, _captured) = new_client(Arc::clone(&session));

    let id = channel_id(1);
    client.get_channel(&id).unwrap();
    let nick = joined_nick(&session.sent()[0]);
    events
        .send(SessionEvent::Stanza(presence_from(
            &room_for(&id),
            &nick,
            None,
            &[110, 201],
        )))
        .unwrap();

    wait_for("instant room request", || {
        session.sent().iter().any(|s| s.name() == "iq")
    })
    .await;

    let sent = session.sent();
    let iq = sent.iter().find(|s| s.name() == "iq").unwrap();
    assert_eq!(iq.attr("type"), Some("set"));
    assert_eq!(iq.attr("to"), Some(room_for(&id).as_str()));
}

// =========================================================================
// Leaving and eviction
// =========================================================================

#[tokio::test]
async fn test_self_unavailable_marks_left_and_evicts() {
    let session = StubSession::online();
    let (client, events, _captured) = new_client(Arc::clone(&session));

    let id = channel_id(1);
    let nick = joined_channel(&client, &session, &events, &id).await;
    let channel = client.get_channel(&id).unwrap();

    events
        .send(SessionEvent::Stanza(presence_from(
            &room_for(&id),
            &nick,
            Some("unavailable"),
            &[110],
        )))
        .unwrap();

    wait_for("channel left", || !channel.is_active()).await;

    // The left entry is evicted on the next lookup; the one after that
    // starts a fresh join.
    assert!(client.get_channel(&id).is_none());
    assert!(client.get_channel(&id).is_some());
    assert_eq!(join_presences(&session.sent()).len(), 2);
}

#[tokio::test]
async fn test_nick_change_is_not_a_leave() {
    let session = StubSession::online();
    let (client, events, _captured) = new_client(Arc::clone(&session));

    let id = channel_id(1);
    let nick = joined_channel(&client, &session, &events, &id).await;
    let channel = client.get_channel(&id).unwrap();

    events
        .send(SessionEvent::Stanza(presence_from(
            &room_for(&id),
            &nick,
            Some("unavailable"),
            &[110, 303],
        )))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(channel.is_active());
}

#[tokio::test]
async fn test_error_presence_marks_left() {
    let session = StubSession::online();
    let (client, events, _captured) = new_client(Arc::clone(&session));

    let id = channel_id(1);
    let nick = joined_channel(&client, &session, &events, &id).await;
    let channel = client.get_channel(&id).unwrap();

    events
        .send(SessionEvent::Stanza(presence_from(
            &room_for(&id),
            &nick,
            Some("error"),
            &[110],
        )))
        .unwrap();

    wait_for("channel left on error", || !channel.is_active()).await;
}

#[tokio::test]
async fn test_other_participant_presence_is_ignored() {
    let session = StubSession::online();
    let (client, events, _captured) = new_client(Arc::clone(&session));

    let id = channel_id(1);
    let channel = client.get_channel(&id).unwrap();

    // Someone else joins the room: no self status, different nick.
    events
        .send(SessionEvent::Stanza(presence_from(
            &room_for(&id),
            "someoneelse",
            None,
            &[],
        )))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(channel.is_active());

    // No sender worker was started, so a send stays queued.
    channel.send(b"queued".to_vec());
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(sent_messages(&session.sent()).is_empty());
}

#[tokio::test]
async fn test_leave_is_idempotent() {
    let session = StubSession::online();
    let (client, _events, _captured) = new_client(Arc::clone(&session));

    let channel = client.get_channel(&channel_id(1)).unwrap();
    channel.leave();
    channel.leave();
    assert!(!channel.is_active());
    assert_eq!(leave_presences(&session.sent()).len(), 1);
}

// =========================================================================
// Inbound delivery
// =========================================================================

#[tokio::test]
async fn test_groupchat_message_delivered_to_sink() {
    let session = StubSession::online();
    let (client, events, captured) = new_client(Arc::clone(&session));

    let id = channel_id(1);
    joined_channel(&client, &session, &events, &id).await;

    events
        .send(SessionEvent::Stanza(message_from(
            &room_for(&id),
            "peer",
            b"hello",
        )))
        .unwrap();

    wait_for("payload delivered", || !captured.payloads().is_empty()).await;
    assert_eq!(captured.payloads(), vec![b"hello".to_vec()]);
}

#[tokio::test]
async fn test_private_message_is_dropped() {
    let session = StubSession::online();
    let (client, events, captured) = new_client(Arc::clone(&session));

    let id = channel_id(1);
    joined_channel(&client, &session, &events, &id).await;

    let private = Element::builder("message", "jabber:client")
        .attr("from", room_for(&id).occupant("peer"))
        .attr("type", "chat")
        .append(MsgPayload::new(b"psst".to_vec()).to_element())
        .build();
    events.send(SessionEvent::Stanza(private)).unwrap();

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(captured.payloads().is_empty());
}

#[tokio::test]
async fn test_message_without_payload_element_is_dropped() {
    let session = StubSession::online();
    let (client, events, captured) = new_client(Arc::clone(&session));

    let id = channel_id(1);
    joined_channel(&client, &session, &events, &id).await;

    let bare = Element::builder("message", "jabber:client")
        .attr("from", room_for(&id).occupant("peer"))
        .attr("type", "groupchat")
        .build();
    events.send(SessionEvent::Stanza(bare)).unwrap();

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(captured.payloads().is_empty());
}

#[tokio::test]
async fn test_malformed_payload_is_dropped() {
    let session = StubSession::online();
    let (client, events, captured) = new_client(Arc::clone(&session));

    let id = channel_id(1);
    joined_channel(&client, &session, &events, &id).await;

    let broken = Element::builder("message", "jabber:client")
        .attr("from", room_for(&id).occupant("peer"))
        .attr("type", "groupchat")
        .append(
            Element::builder(MSG_TAG, XMLNS)
                .append(minidom::Node::Text("%%% not base64 %%%".to_string()))
                .build(),
        )
        .build();
    events.send(SessionEvent::Stanza(broken)).unwrap();

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(captured.payloads().is_empty());
}

#[tokio::test]
async fn test_message_for_unknown_room_is_ignored() {
    let session = StubSession::online();
    let (client, events, captured) = new_client(Arc::clone(&session));

    let id = channel_id(1);
    joined_channel(&client, &session, &events, &id).await;

    let other_room = room_for(&channel_id(2));
    events
        .send(SessionEvent::Stanza(message_from(
            &other_room,
            "peer",
            b"stray",
        )))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(captured.payloads().is_empty());
}

// =========================================================================
// Disconnect handling
// =========================================================================

#[tokio::test]
async fn test_network_disconnect_clears_registry() {
    let session = StubSession::online();
    let (client, events, _captured) = new_client(Arc::clone(&session));

    let id = channel_id(1);
    let channel = client.get_channel(&id).unwrap();

    events
        .send(SessionEvent::Disconnected {
            reason: DisconnectReason::Network("connection reset".into()),
        })
        .unwrap();

    wait_for("registry cleared", || !channel.is_active()).await;

    // The stub session still reports connected, so a lookup starts a
    // fresh join right away.
    wait_for("fresh join after clear", || {
        let _ = client.get_channel(&id);
        join_presences(&session.sent()).len() >= 2
    })
    .await;
}

#[tokio::test]
async fn test_explicit_disconnect_leaves_rooms_and_clears() {
    let session = StubSession::online();
    let (client, events, _captured) = new_client(Arc::clone(&session));

    let id = channel_id(1);
    joined_channel(&client, &session, &events, &id).await;

    client.disconnect().await;
    assert!(!session.is_connected());
    assert!(!leave_presences(&session.sent()).is_empty());
    assert!(client.get_channel(&id).is_none());
}

// =========================================================================
// Refresh and the refresher task
// =========================================================================

#[tokio::test]
async fn test_refresh_reconnects_when_disconnected() {
    let session = StubSession::offline();
    let (client, _events, _captured) = new_client(Arc::clone(&session));

    client.refresh().await;
    assert_eq!(session.connect_count(), 1);
    assert!(client.is_connected());

    // Already connected: no further connect attempts.
    client.refresh().await;
    assert_eq!(session.connect_count(), 1);
}

#[tokio::test]
async fn test_refresh_hook_reinstantiates_channel() {
    let session = StubSession::offline();
    let (client, _events, _captured) = new_client(Arc::clone(&session));

    let id = channel_id(1);
    client.add_refresh_hook(move |c| {
        let _ = c.get_channel(&id);
    });

    client.refresh().await;
    assert_eq!(join_presences(&session.sent()).len(), 1);
}

#[tokio::test]
async fn test_refresher_runs_periodically_and_stops() {
    let session = StubSession::online();
    let (client, _events, _captured) = new_client(Arc::clone(&session));

    let cycles = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&cycles);
    client.add_refresh_hook(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let refresher = Refresher::spawn(Arc::clone(&client), Duration::from_millis(20));
    wait_for("several refresh cycles", || {
        cycles.load(Ordering::SeqCst) >= 3
    })
    .await;

    refresher.stop().await;
    let after_stop = cycles.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(cycles.load(Ordering::SeqCst), after_stop);
}
