//! Per-room channel: join state machine, outbound queue, sender worker.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use xmpp_parsers::message::{Message, MessageType};
use xmpp_parsers::muc::user::{MucUser, Status};
use xmpp_parsers::ns;
use xmpp_parsers::presence::{Presence, Type as PresenceType};

use muxcast_protocol::{random_nick, MsgPayload, RoomAddress};
use muxcast_xmpp::{Session, SessionError};

use crate::wire;
use crate::MessageSink;

/// Queue, worker handle and stop flag, guarded together.
struct ChannelState {
    queue: VecDeque<Vec<u8>>,
    stop_sender: bool,
    sender: Option<JoinHandle<()>>,
}

/// One MUC room subscription.
///
/// Created joining (the join presence goes out immediately); the first
/// confirming self-presence starts the sender worker. Leaving — whether
/// requested, caused by a room error, or forced by a disconnect — is
/// terminal: the registry drops left channels and creates fresh ones on
/// demand.
pub struct RoomChannel<S: Session> {
    session: Arc<S>,
    room: RoomAddress,
    nick: String,
    left: AtomicBool,
    state: Mutex<ChannelState>,
    queue_notify: Notify,
    sink: Arc<dyn MessageSink>,
}

impl<S: Session> RoomChannel<S> {
    /// Creates the channel and issues the MUC join.
    pub(crate) fn open(
        session: Arc<S>,
        room: RoomAddress,
        sink: Arc<dyn MessageSink>,
    ) -> Result<Arc<Self>, SessionError> {
        let nick = random_nick();
        info!(room = %room, "joining room");
        session.send_stanza(wire::join_presence(&room, &nick))?;
        Ok(Arc::new(Self {
            session,
            room,
            nick,
            left: AtomicBool::new(false),
            state: Mutex::new(ChannelState {
                queue: VecDeque::new(),
                stop_sender: false,
                sender: None,
            }),
            queue_notify: Notify::new(),
            sink,
        }))
    }

    /// The room this channel is bound to.
    pub fn room(&self) -> &RoomAddress {
        &self.room
    }

    /// Whether the channel is still usable. Once false it never flips back.
    pub fn is_active(&self) -> bool {
        !self.left.load(Ordering::SeqCst)
    }

    /// Queues a payload for sending. Never blocks and never fails; the
    /// sender worker submits queued payloads in order once the room is
    /// joined and the session connected.
    pub fn send(&self, payload: Vec<u8>) {
        {
            let mut state = self.state.lock().unwrap();
            state.queue.push_back(payload);
        }
        self.queue_notify.notify_one();
    }

    /// Requests to leave the room. Idempotent.
    pub fn leave(&self) {
        if !self.left.swap(true, Ordering::SeqCst) {
            info!(room = %self.room, "leaving room");
            if let Err(e) = self
                .session
                .send_stanza(wire::leave_presence(&self.room, &self.nick))
            {
                debug!(room = %self.room, error = %e, "could not send leave presence");
            }
        }
    }

    /// Leaves the room, stops the sender worker and discards whatever is
    /// still queued. Called by the registry when the channel is evicted.
    pub(crate) fn shutdown(&self) {
        self.leave();
        let discarded = {
            let mut state = self.state.lock().unwrap();
            state.stop_sender = true;
            let discarded = state.queue.len();
            state.queue.clear();
            discarded
        };
        if discarded > 0 {
            debug!(room = %self.room, discarded, "discarding queued payloads");
        }
        self.queue_notify.notify_one();
    }

    /// Handles a presence stanza addressed from this channel's room.
    ///
    /// Only self-presence matters: it either confirms the join (spawning
    /// the sender worker on the first confirmation) or tells us we are out
    /// of the room.
    pub(crate) fn handle_presence(self: &Arc<Self>, presence: &Presence, from_nick: Option<&str>) {
        let statuses = muc_statuses(presence);
        let is_self = statuses.contains(&Status::SelfPresence)
            || from_nick == Some(self.nick.as_str());
        if !is_self {
            return;
        }

        if presence.type_ == PresenceType::Error {
            warn!(room = %self.room, "error presence from room");
            self.left.store(true, Ordering::SeqCst);
            return;
        }

        // A nick change is reported as an unavailable presence too; it does
        // not mean we left the room.
        let unavailable =
            presence.type_ == PresenceType::Unavailable && !statuses.contains(&Status::NewNick);
        if unavailable {
            warn!(room = %self.room, "removed from room");
            self.left.store(true, Ordering::SeqCst);
            return;
        }

        if statuses.contains(&Status::RoomHasBeenCreated) {
            info!(room = %self.room, "created room, accepting default configuration");
            let iq = wire::instant_room_request(&self.room, &format!("create-{}", &self.nick[..8]));
            if let Err(e) = self.session.send_stanza(iq) {
                debug!(room = %self.room, error = %e, "could not request room configuration");
            }
        }

        let mut state = self.state.lock().unwrap();
        if state.sender.is_none() {
            info!(room = %self.room, "joined room");
            state.stop_sender = false;
            let channel = Arc::clone(self);
            state.sender = Some(tokio::spawn(async move { channel.run_send_loop().await }));
        }
    }

    /// Handles a message stanza addressed from this channel's room.
    pub(crate) fn handle_message(&self, message: &Message, from: &str) {
        match message.type_ {
            MessageType::Groupchat => {}
            MessageType::Error => {
                warn!(room = %self.room, from, "error message from room");
                self.left.store(true, Ordering::SeqCst);
                return;
            }
            _ => {
                warn!(room = %self.room, from, "ignoring private message in room");
                return;
            }
        }

        let Some(element) = message
            .payloads
            .iter()
            .find(|p| p.is(muxcast_protocol::MSG_TAG, muxcast_protocol::XMLNS))
        else {
            debug!(room = %self.room, from, "message without payload element");
            return;
        };
        match MsgPayload::from_element(element) {
            Ok(payload) => {
                debug!(
                    room = %self.room,
                    from,
                    bytes = payload.data().len(),
                    "received payload"
                );
                self.sink.deliver(payload.into_data());
            }
            Err(e) => warn!(room = %self.room, from, error = %e, "dropping malformed payload"),
        }
    }

    /// Sender worker loop.
    ///
    /// Whenever there is something queued and the session is connected, the
    /// whole queue is moved out under the channel lock and then submitted
    /// stanza by stanza without it. A single worker per channel keeps the
    /// per-channel FIFO order regardless of the batching.
    async fn run_send_loop(self: Arc<Self>) {
        loop {
            let batch = {
                let mut state = self.state.lock().unwrap();
                if state.stop_sender {
                    break;
                }
                if state.queue.is_empty() || !self.session.is_connected() {
                    None
                } else {
                    Some(std::mem::take(&mut state.queue))
                }
            };

            let Some(batch) = batch else {
                self.queue_notify.notified().await;
                continue;
            };

            debug!(room = %self.room, count = batch.len(), "sending queued payloads");
            for data in batch {
                let stanza = wire::payload_message(&self.room, &MsgPayload::new(data));
                if let Err(e) = self.session.send_stanza(stanza) {
                    warn!(room = %self.room, error = %e, "failed to hand payload to session");
                }
            }
        }
        debug!(room = %self.room, "sender worker stopped");
    }
}

/// Collects the MUC status codes attached to a presence.
fn muc_statuses(presence: &Presence) -> Vec<Status> {
    presence
        .payloads
        .iter()
        .filter(|p| p.is("x", ns::MUC_USER))
        .filter_map(|p| MucUser::try_from((*p).clone()).ok())
        .flat_map(|user| user.status)
        .collect()
}
