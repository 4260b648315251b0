//! The production session actor over `tokio-xmpp`.
//!
//! A single spawned task exclusively owns the XMPP client. Callers talk to
//! it through a command channel, and everything the server sends comes back
//! out as [`SessionEvent`]s. Funnelling both directions through one task
//! serializes all library access the way a client mutex would, without ever
//! blocking callers.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::StreamExt;
use jid::Jid;
use minidom::Element;
use tokio::sync::{mpsc, oneshot};
use tokio_xmpp::{AsyncClient, Event};
use tracing::{debug, info, warn};

use crate::{DisconnectReason, Session, SessionError, SessionEvent};

/// Account settings for the XMPP connection.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// JID of the relay's XMPP account.
    pub jid: String,
    /// Password of the account.
    pub password: String,
}

enum Command {
    Connect { reply: oneshot::Sender<bool> },
    Disconnect { reply: oneshot::Sender<()> },
    Send(Element),
    SetRootCa(PathBuf),
}

/// Handle to the session actor.
pub struct XmppSession {
    commands: mpsc::UnboundedSender<Command>,
    connected: Arc<AtomicBool>,
}

impl XmppSession {
    /// Spawns the session actor. Returns the shared handle and the stream
    /// of session events for the room engine's dispatcher to consume.
    ///
    /// The actor does not connect yet; call [`Session::connect`].
    pub fn spawn(config: SessionConfig) -> (Arc<Self>, mpsc::UnboundedReceiver<SessionEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));

        let actor = Actor {
            config,
            commands: cmd_rx,
            events: event_tx,
            connected: Arc::clone(&connected),
            client: None,
            root_ca: None,
        };
        tokio::spawn(actor.run());

        (
            Arc::new(Self {
                commands: cmd_tx,
                connected,
            }),
            event_rx,
        )
    }

    /// Configures a root CA bundle for TLS verification.
    ///
    /// Must be called before the first connect and fails with
    /// [`SessionError::AlreadyConnected`] afterwards. The bundle is handed
    /// to the TLS stack through `SSL_CERT_FILE` when the actor connects.
    pub fn set_root_ca(&self, path: PathBuf) -> Result<(), SessionError> {
        if self.is_connected() {
            return Err(SessionError::AlreadyConnected);
        }
        self.commands
            .send(Command::SetRootCa(path))
            .map_err(|_| SessionError::SessionGone)
    }
}

impl Session for XmppSession {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn send_stanza(&self, stanza: Element) -> Result<(), SessionError> {
        self.commands
            .send(Command::Send(stanza))
            .map_err(|_| SessionError::SessionGone)
    }

    async fn connect(&self) -> Result<bool, SessionError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Connect { reply })
            .map_err(|_| SessionError::SessionGone)?;
        response.await.map_err(|_| SessionError::SessionGone)
    }

    async fn disconnect(&self) -> Result<(), SessionError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Disconnect { reply })
            .map_err(|_| SessionError::SessionGone)?;
        response.await.map_err(|_| SessionError::SessionGone)
    }
}

struct Actor {
    config: SessionConfig,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<SessionEvent>,
    connected: Arc<AtomicBool>,
    client: Option<AsyncClient>,
    root_ca: Option<PathBuf>,
}

enum Step {
    Command(Option<Command>),
    Event(Option<Event>),
}

impl Actor {
    async fn run(mut self) {
        loop {
            let Some(client) = self.client.as_mut() else {
                // Idle: nothing to poll but the command channel.
                match self.commands.recv().await {
                    Some(command) => self.handle_idle_command(command).await,
                    None => break,
                }
                continue;
            };

            let step = tokio::select! {
                command = self.commands.recv() => Step::Command(command),
                event = client.next() => Step::Event(event),
            };

            match step {
                Step::Command(Some(command)) => self.handle_connected_command(command).await,
                Step::Command(None) => {
                    self.teardown().await;
                    break;
                }
                Step::Event(Some(event)) => self.handle_event(event),
                Step::Event(None) => self.mark_disconnected("stream ended".to_string()),
            }
        }
        debug!("session actor stopped");
    }

    async fn handle_idle_command(&mut self, command: Command) {
        match command {
            Command::Connect { reply } => {
                let online = self.establish().await;
                let _ = reply.send(online);
            }
            Command::Disconnect { reply } => {
                let _ = reply.send(());
            }
            Command::Send(_) => warn!("dropping stanza, session is not connected"),
            Command::SetRootCa(path) => self.root_ca = Some(path),
        }
    }

    async fn handle_connected_command(&mut self, command: Command) {
        match command {
            Command::Connect { reply } => {
                let _ = reply.send(true);
            }
            Command::Disconnect { reply } => {
                self.teardown().await;
                let _ = reply.send(());
            }
            Command::Send(stanza) => {
                if let Some(client) = self.client.as_mut() {
                    if let Err(e) = client.send_stanza(stanza).await {
                        warn!(error = %e, "failed to submit stanza");
                    }
                }
            }
            Command::SetRootCa(_) => {
                warn!("ignoring root CA change on a connected session");
            }
        }
    }

    /// Builds a fresh client and drives it until it is online or refused.
    async fn establish(&mut self) -> bool {
        let jid = match Jid::from_str(&self.config.jid) {
            Ok(jid) => jid,
            Err(e) => {
                warn!(jid = %self.config.jid, error = %e, "invalid account jid");
                return false;
            }
        };

        if let Some(path) = &self.root_ca {
            // Both rustls-native-certs and openssl consult SSL_CERT_FILE
            // when they build their trust store.
            std::env::set_var("SSL_CERT_FILE", path);
        }

        info!(jid = %self.config.jid, "connecting to XMPP server");
        let mut client = AsyncClient::new(jid, self.config.password.clone());
        // Reconnection policy belongs to the refresher, not the library.
        client.set_reconnect(false);

        loop {
            match client.next().await {
                Some(Event::Online { bound_jid, .. }) => {
                    info!(jid = %bound_jid, "session online");
                    self.connected.store(true, Ordering::SeqCst);
                    let _ = self.events.send(SessionEvent::Connected);
                    self.client = Some(client);
                    return true;
                }
                Some(Event::Disconnected(e)) => {
                    warn!(error = %e, "connection attempt failed");
                    return false;
                }
                Some(_) => continue,
                None => {
                    warn!("stream ended during connection attempt");
                    return false;
                }
            }
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Stanza(stanza) => {
                let _ = self.events.send(SessionEvent::Stanza(stanza));
            }
            Event::Disconnected(e) => {
                warn!(error = %e, "disconnected by server");
                self.mark_disconnected(e.to_string());
            }
            Event::Online { .. } => {}
        }
    }

    fn mark_disconnected(&mut self, description: String) {
        self.client = None;
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.events.send(SessionEvent::Disconnected {
            reason: DisconnectReason::Network(description),
        });
    }

    async fn teardown(&mut self) {
        if let Some(mut client) = self.client.take() {
            debug!("closing XMPP stream");
            if let Err(e) = client.send_end().await {
                debug!(error = %e, "error closing stream");
            }
        }
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.events.send(SessionEvent::Disconnected {
            reason: DisconnectReason::Explicit,
        });
    }
}
