//! Native embedding facade: one channel, callback delivery.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::warn;

use muxcast_muc::{MessageSink, MucClient, Refresher};
use muxcast_protocol::ChannelId;
use muxcast_xmpp::{SessionConfig, SessionError, XmppSession};

/// Connection settings for a [`Broadcast`].
#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    /// Game id the channel belongs to.
    pub game_id: String,
    /// JID of the XMPP account.
    pub jid: String,
    /// Password of the account.
    pub password: String,
    /// Address of the MUC service hosting the rooms.
    pub muc_service: String,
    /// Time between reconnect / re-join attempts.
    pub refresh_interval: Duration,
}

impl BroadcastConfig {
    /// Creates a config with the default refresh interval.
    pub fn new(
        game_id: impl Into<String>,
        jid: impl Into<String>,
        password: impl Into<String>,
        muc_service: impl Into<String>,
    ) -> Self {
        Self {
            game_id: game_id.into(),
            jid: jid.into(),
            password: password.into(),
            muc_service: muc_service.into(),
            refresh_interval: Refresher::DEFAULT_INTERVAL,
        }
    }
}

/// Sends and receives on a single game channel as a native peer.
///
/// Received payloads are handed to the callback given at construction.
/// [`start`](Self::start) connects and begins the refresher, whose
/// immediate first cycle joins the channel; after a reconnect the next
/// cycle re-joins it.
pub struct Broadcast {
    session: Arc<XmppSession>,
    muc: Arc<MucClient<XmppSession>>,
    channel_id: ChannelId,
    refresh_interval: Duration,
    refresher: Mutex<Option<Refresher>>,
}

impl Broadcast {
    /// Wires up the broadcast for `channel_id`. Nothing connects until
    /// [`start`](Self::start).
    pub fn new<F>(config: BroadcastConfig, channel_id: ChannelId, on_message: F) -> Self
    where
        F: Fn(Vec<u8>) + Send + Sync + 'static,
    {
        let (session, events) = XmppSession::spawn(SessionConfig {
            jid: config.jid,
            password: config.password,
        });

        let sink: Arc<dyn MessageSink> = Arc::new(on_message);
        let muc = MucClient::new(
            Arc::clone(&session),
            events,
            config.game_id,
            config.muc_service,
            move |_: &ChannelId| Arc::clone(&sink),
        );

        // Re-join the channel after every refresh, so a reconnect picks the
        // room back up without waiting for the next send.
        muc.add_refresh_hook(move |client| {
            let _ = client.get_channel(&channel_id);
        });

        Self {
            session,
            muc,
            channel_id,
            refresh_interval: config.refresh_interval,
            refresher: Mutex::new(None),
        }
    }

    /// Configures a root CA bundle for the XMPP TLS handshake. Must be
    /// called before [`start`](Self::start).
    pub fn set_root_ca(&self, path: PathBuf) -> Result<(), SessionError> {
        self.session.set_root_ca(path)
    }

    /// The channel this broadcast is bound to.
    pub fn channel_id(&self) -> &ChannelId {
        &self.channel_id
    }

    /// Connects (a failure is non-fatal — the refresher keeps retrying)
    /// and starts the refresher, whose first cycle joins the channel
    /// immediately.
    pub async fn start(&self) {
        {
            let refresher = self.refresher.lock().unwrap();
            if refresher.is_some() {
                warn!("broadcast is already started");
                return;
            }
        }

        if !self.muc.connect().await {
            warn!("initial connect failed, will keep trying");
        }
        let refresher = Refresher::spawn(Arc::clone(&self.muc), self.refresh_interval);
        *self.refresher.lock().unwrap() = Some(refresher);
    }

    /// Queues a payload onto the channel. Dropped with a warning while
    /// disconnected — delivery across reconnects is not guaranteed.
    pub fn send(&self, payload: Vec<u8>) {
        match self.muc.get_channel(&self.channel_id) {
            Some(channel) => channel.send(payload),
            None => warn!("cannot send message, disconnected?"),
        }
    }

    /// Stops the refresher and disconnects the session.
    pub async fn stop(&self) {
        let refresher = { self.refresher.lock().unwrap().take() };
        if let Some(refresher) = refresher {
            refresher.stop().await;
        }
        self.muc.disconnect().await;
    }
}
