//! The MUC client: registry of room channels over one session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use minidom::Element;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use xmpp_parsers::message::Message;
use xmpp_parsers::presence::Presence;

use muxcast_protocol::{ChannelId, RoomAddress};
use muxcast_xmpp::{DisconnectReason, Session, SessionEvent};

use crate::channel::RoomChannel;
use crate::{MessageSink, SinkFactory};

type RefreshHook<S> = Box<dyn Fn(&MucClient<S>) + Send + Sync>;

/// Registry of the channels subscribed on one session.
///
/// Derives room addresses from channel ids, creates channels on demand,
/// evicts channels that have left their room, and owns the disconnect-time
/// cleanup. A dispatcher task routes inbound stanzas to channels by their
/// room address.
pub struct MucClient<S: Session> {
    session: Arc<S>,
    game_id: String,
    muc_service: String,
    /// Guards the map only; channels lock their own state.
    channels: Mutex<HashMap<String, Arc<RoomChannel<S>>>>,
    sink_factory: SinkFactory,
    refresh_hooks: Mutex<Vec<RefreshHook<S>>>,
}

impl<S: Session> MucClient<S> {
    /// Creates the client and spawns the dispatcher consuming session
    /// events.
    pub fn new(
        session: Arc<S>,
        events: mpsc::UnboundedReceiver<SessionEvent>,
        game_id: impl Into<String>,
        muc_service: impl Into<String>,
        sink_factory: impl Fn(&ChannelId) -> Arc<dyn MessageSink> + Send + Sync + 'static,
    ) -> Arc<Self> {
        let client = Arc::new(Self {
            session,
            game_id: game_id.into(),
            muc_service: muc_service.into(),
            channels: Mutex::new(HashMap::new()),
            sink_factory: Box::new(sink_factory),
            refresh_hooks: Mutex::new(Vec::new()),
        });
        client.spawn_dispatcher(events);
        client
    }

    /// Connects the underlying session. `true` once online.
    pub async fn connect(&self) -> bool {
        match self.session.connect().await {
            Ok(online) => online,
            Err(e) => {
                warn!(error = %e, "connect failed");
                false
            }
        }
    }

    /// Snapshot of the session state.
    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    /// Disconnects, leaving all rooms and clearing the registry.
    pub async fn disconnect(&self) {
        let channels: Vec<_> = {
            let channels = self.channels.lock().unwrap();
            channels.values().cloned().collect()
        };
        for channel in &channels {
            channel.leave();
        }

        // The registry lock is released here: the session emits the
        // explicit disconnect event, which the dispatcher handles with its
        // own locking.
        if let Err(e) = self.session.disconnect().await {
            debug!(error = %e, "session disconnect failed");
        }

        self.clear_registry();
    }

    /// Looks up or creates the channel for `id`.
    ///
    /// Returns `None` while disconnected. A registry entry that has left
    /// its room is evicted and `None` returned; the next lookup starts a
    /// fresh join.
    pub fn get_channel(&self, id: &ChannelId) -> Option<Arc<RoomChannel<S>>> {
        if !self.session.is_connected() {
            return None;
        }

        let room = RoomAddress::derive(&self.game_id, id, &self.muc_service);
        let mut channels = self.channels.lock().unwrap();
        if let Some(existing) = channels.get(room.as_str()).cloned() {
            if existing.is_active() {
                return Some(existing);
            }
            debug!(room = %room, "evicting left channel");
            channels.remove(room.as_str());
            drop(channels);
            existing.shutdown();
            return None;
        }

        let sink = (self.sink_factory)(id);
        match RoomChannel::open(Arc::clone(&self.session), room.clone(), sink) {
            Ok(channel) => {
                channels.insert(room.as_str().to_string(), Arc::clone(&channel));
                Some(channel)
            }
            Err(e) => {
                warn!(room = %room, error = %e, "could not start join");
                None
            }
        }
    }

    /// Registers a hook run after every refresh cycle.
    ///
    /// Embedders use this to re-instantiate channels that must stay joined
    /// across reconnects.
    pub fn add_refresh_hook(&self, hook: impl Fn(&Self) + Send + Sync + 'static) {
        self.refresh_hooks.lock().unwrap().push(Box::new(hook));
    }

    /// One refresh cycle: reconnect when disconnected, then run the hooks.
    pub async fn refresh(&self) {
        debug!("refresh cycle");
        if !self.session.is_connected() {
            info!("session is disconnected, attempting reconnect");
            if !self.connect().await {
                warn!("reconnect failed, will retry");
            }
        }

        let hooks = self.refresh_hooks.lock().unwrap();
        for hook in hooks.iter() {
            hook(self);
        }
    }

    fn spawn_dispatcher(self: &Arc<Self>, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    SessionEvent::Connected => debug!("session connected"),
                    SessionEvent::Disconnected { reason } => client.handle_disconnect(reason),
                    SessionEvent::Stanza(stanza) => client.dispatch_stanza(stanza),
                }
            }
            debug!("session event stream ended");
        });
    }

    /// Disconnect cleanup, with the reason threaded in explicitly.
    ///
    /// On explicit teardown the channels are asked to leave and
    /// [`disconnect`](Self::disconnect) drives the rest; a network loss
    /// clears the registry outright so the refresher can start over.
    fn handle_disconnect(&self, reason: DisconnectReason) {
        match reason {
            DisconnectReason::Explicit => {
                let channels: Vec<_> = {
                    let channels = self.channels.lock().unwrap();
                    channels.values().cloned().collect()
                };
                for channel in channels {
                    channel.leave();
                }
            }
            DisconnectReason::Network(description) => {
                warn!(%description, "disconnected by server");
                self.clear_registry();
            }
        }
    }

    fn clear_registry(&self) {
        let drained: Vec<_> = {
            let mut channels = self.channels.lock().unwrap();
            channels.drain().map(|(_, channel)| channel).collect()
        };
        for channel in drained {
            channel.shutdown();
        }
    }

    fn dispatch_stanza(&self, stanza: Element) {
        let name = stanza.name().to_string();
        match name.as_str() {
            "message" => {
                let Ok(message) = Message::try_from(stanza) else {
                    debug!("unparseable message stanza");
                    return;
                };
                let Some(from) = message.from.clone() else {
                    return;
                };
                let from = from.to_string();
                let (bare, _) = split_occupant(&from);
                if let Some(channel) = self.lookup(bare) {
                    channel.handle_message(&message, &from);
                }
            }
            "presence" => {
                let Ok(presence) = Presence::try_from(stanza) else {
                    debug!("unparseable presence stanza");
                    return;
                };
                let Some(from) = presence.from.clone() else {
                    return;
                };
                let from = from.to_string();
                let (bare, nick) = split_occupant(&from);
                if let Some(channel) = self.lookup(bare) {
                    channel.handle_presence(&presence, nick);
                }
            }
            // IQ results (e.g. from the instant-room request) need no
            // routing.
            _ => {}
        }
    }

    fn lookup(&self, bare: &str) -> Option<Arc<RoomChannel<S>>> {
        let channels = self.channels.lock().unwrap();
        channels.get(bare).cloned()
    }
}

/// Splits `room@service/nick` into the bare address and the occupant nick.
fn split_occupant(from: &str) -> (&str, Option<&str>) {
    match from.split_once('/') {
        Some((bare, nick)) => (bare, Some(nick)),
        None => (from, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_occupant_with_nick() {
        let (bare, nick) = split_occupant("room@muc.example.org/abcdef");
        assert_eq!(bare, "room@muc.example.org");
        assert_eq!(nick, Some("abcdef"));
    }

    #[test]
    fn test_split_occupant_bare() {
        let (bare, nick) = split_occupant("room@muc.example.org");
        assert_eq!(bare, "room@muc.example.org");
        assert_eq!(nick, None);
    }
}
