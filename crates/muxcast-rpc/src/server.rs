//! The JSON-RPC endpoint and the server around it.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use muxcast_muc::{MessageSink, MucClient, Refresher, RoomChannel};
use muxcast_protocol::ChannelId;
use muxcast_xmpp::{Session, SessionConfig, SessionError, XmppSession};

use crate::{ReceiveBuffer, ServerError};

const PARSE_ERROR: i64 = -32700;
const INVALID_REQUEST: i64 = -32600;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;
const INTERNAL_ERROR: i64 = -32603;

/// Buffers for every channel ever touched, keyed by channel id.
///
/// Kept outside the channels themselves so sequence numbers stay monotonic
/// for the whole process lifetime, even when a channel is evicted after a
/// room error and re-joined later.
#[derive(Clone, Default)]
struct BufferMap {
    inner: Arc<Mutex<HashMap<ChannelId, Arc<ReceiveBuffer>>>>,
}

impl BufferMap {
    fn for_channel(&self, id: &ChannelId) -> Arc<ReceiveBuffer> {
        let mut inner = self.inner.lock().unwrap();
        Arc::clone(inner.entry(*id).or_default())
    }
}

/// Shared state of the RPC handlers.
struct RpcState<S: Session> {
    muc: Arc<MucClient<S>>,
    buffers: BufferMap,
    receive_timeout: Duration,
    stop: watch::Sender<bool>,
}

/// A failed method call, rendered as a JSON-RPC error object.
struct RpcFailure {
    code: i64,
    message: String,
}

impl RpcFailure {
    fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: INVALID_PARAMS,
            message: message.into(),
        }
    }
}

fn rpc_router<S: Session>(state: Arc<RpcState<S>>) -> Router {
    Router::new()
        .route("/", post(endpoint::<S>))
        .with_state(state)
}

async fn endpoint<S: Session>(
    State(state): State<Arc<RpcState<S>>>,
    body: String,
) -> Response {
    let request: Value = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(e) => {
            debug!(error = %e, "unparseable RPC request");
            let response = json!({
                "jsonrpc": "2.0",
                "id": Value::Null,
                "error": { "code": PARSE_ERROR, "message": "parse error" },
            });
            return Json(response).into_response();
        }
    };

    match dispatch(&state, request).await {
        Some(response) => Json(response).into_response(),
        // A notification: no response body at all.
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

/// Runs one JSON-RPC call. Returns `None` for notifications.
async fn dispatch<S: Session>(state: &RpcState<S>, request: Value) -> Option<Value> {
    let id = request.get("id").cloned();
    let method = request.get("method").and_then(Value::as_str);
    let params = request.get("params").cloned().unwrap_or(Value::Null);

    let result = match method {
        Some("send") => rpc_send(state, &params),
        Some("getseq") => rpc_getseq(state, &params),
        Some("receive") => rpc_receive(state, &params).await,
        Some("stop") => rpc_stop(state),
        Some(other) => Err(RpcFailure {
            code: METHOD_NOT_FOUND,
            message: format!("unknown method {other:?}"),
        }),
        None => Err(RpcFailure {
            code: INVALID_REQUEST,
            message: "missing method".into(),
        }),
    };

    let id = match id {
        Some(id) if !id.is_null() => id,
        // A notification: errors are observable only in the logs.
        _ => {
            if let Err(failure) = &result {
                debug!(
                    code = failure.code,
                    message = %failure.message,
                    "error handling notification"
                );
            }
            return None;
        }
    };

    Some(match result {
        Ok(value) => json!({ "jsonrpc": "2.0", "id": id, "result": value }),
        Err(failure) => json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": failure.code, "message": failure.message },
        }),
    })
}

fn channel_param(params: &Value) -> Result<ChannelId, RpcFailure> {
    let Some(channel) = params.get("channel").and_then(Value::as_str) else {
        return Err(RpcFailure::invalid_params("missing channel parameter"));
    };
    ChannelId::from_hex(channel).map_err(|e| RpcFailure::invalid_params(e.to_string()))
}

fn lookup_channel<S: Session>(
    state: &RpcState<S>,
    id: &ChannelId,
) -> Result<Arc<RoomChannel<S>>, RpcFailure> {
    state.muc.get_channel(id).ok_or_else(|| RpcFailure {
        code: INTERNAL_ERROR,
        message: "failed to access channel, disconnected?".into(),
    })
}

fn rpc_send<S: Session>(state: &RpcState<S>, params: &Value) -> Result<Value, RpcFailure> {
    let Some(message) = params.get("message").and_then(Value::as_str) else {
        return Err(RpcFailure::invalid_params("missing message parameter"));
    };
    let payload = match STANDARD.decode(message) {
        Ok(payload) => payload,
        Err(e) => {
            // send is a notification; a bad message is dropped, not failed.
            warn!(error = %e, "ignoring message that is not valid base64");
            return Ok(Value::Null);
        }
    };

    let id = channel_param(params)?;
    let channel = lookup_channel(state, &id)?;
    channel.send(payload);
    Ok(Value::Null)
}

fn rpc_getseq<S: Session>(state: &RpcState<S>, params: &Value) -> Result<Value, RpcFailure> {
    let id = channel_param(params)?;
    lookup_channel(state, &id)?;
    let seq = state.buffers.for_channel(&id).sequence_number();
    Ok(json!({ "seq": seq }))
}

async fn rpc_receive<S: Session>(
    state: &RpcState<S>,
    params: &Value,
) -> Result<Value, RpcFailure> {
    let id = channel_param(params)?;
    let Some(from_seq) = params.get("fromseq").and_then(Value::as_u64) else {
        return Err(RpcFailure::invalid_params(
            "missing or negative fromseq parameter",
        ));
    };
    lookup_channel(state, &id)?;

    let buffer = state.buffers.for_channel(&id);
    let (messages, seq) = buffer.receive(from_seq, state.receive_timeout).await;
    let encoded: Vec<String> = messages.iter().map(|m| STANDARD.encode(m)).collect();
    Ok(json!({ "seq": seq, "messages": encoded }))
}

fn rpc_stop<S: Session>(state: &RpcState<S>) -> Result<Value, RpcFailure> {
    info!("shutdown requested over RPC");
    state.stop.send_replace(true);
    Ok(Value::Null)
}

/// Settings for a [`BroadcastServer`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Game id the relayed channels belong to.
    pub game_id: String,
    /// JID of the XMPP account.
    pub jid: String,
    /// Password of the XMPP account.
    pub password: String,
    /// Address of the MUC service hosting the rooms.
    pub muc_service: String,
    /// Time between refresher cycles.
    pub refresh_interval: Duration,
    /// Server-side wait of the `receive` method.
    pub receive_timeout: Duration,
}

impl ServerConfig {
    /// Creates a config with the default refresh and receive timings.
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
            receive_timeout: ReceiveBuffer::DEFAULT_TIMEOUT,
        }
    }
}

/// The broadcast RPC server: XMPP session, room engine, refresher and the
/// JSON-RPC endpoint, wired together.
pub struct BroadcastServer {
    session: Arc<XmppSession>,
    muc: Arc<MucClient<XmppSession>>,
    buffers: BufferMap,
    refresh_interval: Duration,
    receive_timeout: Duration,
    stop: watch::Sender<bool>,
    waiter: Mutex<Option<JoinHandle<()>>>,
}

impl BroadcastServer {
    /// Sets up the server. Nothing connects or listens until
    /// [`start`](Self::start).
    pub fn new(config: ServerConfig) -> Self {
        let (session, events) = XmppSession::spawn(SessionConfig {
            jid: config.jid,
            password: config.password,
        });

        let buffers = BufferMap::default();
        let sinks = buffers.clone();
        let muc = MucClient::new(
            Arc::clone(&session),
            events,
            config.game_id,
            config.muc_service,
            move |id: &ChannelId| -> Arc<dyn MessageSink> { sinks.for_channel(id) },
        );

        let (stop, _) = watch::channel(false);
        Self {
            session,
            muc,
            buffers,
            refresh_interval: config.refresh_interval,
            receive_timeout: config.receive_timeout,
            stop,
            waiter: Mutex::new(None),
        }
    }

    /// Configures a root CA bundle for the XMPP TLS handshake. Must be
    /// called before [`start`](Self::start).
    pub fn set_root_ca(&self, path: PathBuf) -> Result<(), SessionError> {
        self.session.set_root_ca(path)
    }

    /// Connects (a failure is non-fatal — the refresher keeps retrying),
    /// starts the refresher and binds the JSON-RPC endpoint.
    pub async fn start(&self, port: u16, local_only: bool) -> Result<(), ServerError> {
        {
            let waiter = self.waiter.lock().unwrap();
            if waiter.is_some() {
                return Err(ServerError::AlreadyStarted);
            }
        }
        self.stop.send_replace(false);

        info!(port, "starting broadcast RPC server");
        if !self.muc.connect().await {
            warn!("initial connect failed, will keep trying");
        }
        let refresher = Refresher::spawn(Arc::clone(&self.muc), self.refresh_interval);

        let host = if local_only {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        } else {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        };
        let listener = TcpListener::bind(SocketAddr::new(host, port))
            .await
            .map_err(ServerError::Bind)?;

        let state = Arc::new(RpcState {
            muc: Arc::clone(&self.muc),
            buffers: self.buffers.clone(),
            receive_timeout: self.receive_timeout,
            stop: self.stop.clone(),
        });
        let app = rpc_router(state);

        let mut shutdown = self.stop.subscribe();
        let server = tokio::spawn(async move {
            let shutdown = async move {
                if !*shutdown.borrow_and_update() {
                    let _ = shutdown.changed().await;
                }
            };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                warn!(error = %e, "RPC server failed");
            }
        });

        // Dedicated waiter: once stop is raised, tear everything down in
        // order — the HTTP server first (draining in-flight requests), then
        // the refresher, then the session.
        let muc = Arc::clone(&self.muc);
        let mut stopped = self.stop.subscribe();
        let waiter = tokio::spawn(async move {
            if !*stopped.borrow_and_update() {
                let _ = stopped.changed().await;
            }
            let _ = server.await;
            refresher.stop().await;
            muc.disconnect().await;
            info!("broadcast RPC server stopped");
        });
        *self.waiter.lock().unwrap() = Some(waiter);
        Ok(())
    }

    /// Blocks until a requested stop has completed. Returns immediately if
    /// the server is not running.
    pub async fn wait(&self) {
        let waiter = { self.waiter.lock().unwrap().take() };
        if let Some(waiter) = waiter {
            let _ = waiter.await;
        }
    }

    /// Requests shutdown and waits for it. Idempotent; safe to call when
    /// the server was never started.
    pub async fn stop(&self) {
        self.stop.send_replace(true);
        self.wait().await;
    }
}
