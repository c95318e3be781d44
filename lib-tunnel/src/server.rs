//! Tunnel server endpoint
//!
//! Owns the session table keyed by session ID, drives one handshake per
//! attached transport, and arms a reconnect-window timer whenever a session
//! loses its transport. Sessions whose window elapses are closed, removed,
//! and reported as `DropConnection`. Transports can come from the built-in
//! WebSocket acceptor or be injected directly by the host.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use lib_crypto::KeyPair;

use crate::constants::{
    DEFAULT_AVG_PING_COUNT, DEFAULT_PING_INTERVAL, DEFAULT_STREAM_TIMEOUT, DEFAULT_TIMEOUT,
};
use crate::error::TunnelError;
use crate::handshake::{send_session_result, server_handshake, ServerHandshakeParams};
use crate::session::{Lifecycle, Session, SessionEvent, SessionSettings};
use crate::transport::{ws, Transport};
use crate::utils::real_ip::{parse_forwarded_for, resolve_real_ip, TrustProxy};

/// Server configuration. The identity keypair is required; everything else
/// has protocol defaults.
pub struct ServerConfig {
    pub keypair: KeyPair,
    /// Reconnect window after a transport loss.
    pub stream_timeout: Duration,
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    pub avg_ping_count: usize,
    /// Per-read handshake deadline.
    pub handshake_timeout: Duration,
    pub allow_disable_encryption: bool,
    pub trust_proxy: TrustProxy,
}

impl ServerConfig {
    /// Build from the hex key serializations used in configuration files.
    pub fn new(private_key_hex: &str, public_key_hex: &str) -> Result<Self> {
        Ok(Self::from_keypair(KeyPair::from_hex(
            private_key_hex,
            public_key_hex,
        )?))
    }

    pub fn from_keypair(keypair: KeyPair) -> Self {
        Self {
            keypair,
            stream_timeout: DEFAULT_STREAM_TIMEOUT,
            ping_interval: DEFAULT_PING_INTERVAL,
            ping_timeout: DEFAULT_TIMEOUT,
            avg_ping_count: DEFAULT_AVG_PING_COUNT,
            handshake_timeout: DEFAULT_TIMEOUT,
            allow_disable_encryption: false,
            trust_proxy: TrustProxy::Disabled,
        }
    }

    pub fn with_stream_timeout(mut self, timeout: Duration) -> Self {
        self.stream_timeout = timeout;
        self
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    pub fn with_allow_disable_encryption(mut self, allow: bool) -> Self {
        self.allow_disable_encryption = allow;
        self
    }

    pub fn with_trust_proxy(mut self, trust: TrustProxy) -> Self {
        self.trust_proxy = trust;
        self
    }
}

/// What the server reports to the host application.
pub enum ServerEvent {
    /// A fresh session completed its first handshake. Resumed sessions do
    /// not reappear here; they re-emit `Connected` on their own event stream.
    Connection {
        session: Session,
        events: mpsc::UnboundedReceiver<SessionEvent>,
    },
    /// A session's reconnect window elapsed and it was destroyed.
    DropConnection { session_id: String },
}

/// The server endpoint. Cheap to clone; clones share the session table.
#[derive(Clone)]
pub struct TunnelServer {
    config: Arc<ServerConfig>,
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    events_tx: mpsc::UnboundedSender<ServerEvent>,
    lifecycle_tx: mpsc::UnboundedSender<(String, Lifecycle)>,
}

impl TunnelServer {
    /// Create the server and the event stream the host consumes.
    pub fn new(config: ServerConfig) -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (lifecycle_tx, lifecycle_rx) = mpsc::unbounded_channel();

        let server = Self {
            config: Arc::new(config),
            sessions: Arc::new(RwLock::new(HashMap::new())),
            events_tx,
            lifecycle_tx,
        };

        tokio::spawn(run_lifecycle(
            lifecycle_rx,
            server.sessions.clone(),
            server.events_tx.clone(),
            server.config.stream_timeout,
        ));

        (server, events_rx)
    }

    /// Number of live sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Attach an externally established transport.
    pub fn attach(&self, transport: Transport) {
        self.attach_with_addr(transport, None);
    }

    /// Attach a transport along with its resolved client address.
    pub fn attach_with_addr(&self, transport: Transport, remote_addr: Option<IpAddr>) {
        let server = self.clone();
        tokio::spawn(async move {
            handle_connection(server, transport, remote_addr).await;
        });
    }

    /// Accept WebSocket connections on `addr` until the returned task is
    /// aborted.
    pub async fn bind(&self, addr: &str) -> Result<JoinHandle<()>, TunnelError> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("tunnel server listening on {}", addr);

        let server = self.clone();
        Ok(tokio::spawn(async move {
            loop {
                let (stream, peer) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("accept failed: {}", e);
                        continue;
                    }
                };

                let server = server.clone();
                tokio::spawn(async move {
                    use tokio_tungstenite::tungstenite::handshake::server::{
                        ErrorResponse, Request, Response,
                    };

                    let mut forwarded: Vec<IpAddr> = Vec::new();
                    let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                        if let Some(header) = req
                            .headers()
                            .get("x-forwarded-for")
                            .and_then(|v| v.to_str().ok())
                        {
                            forwarded = parse_forwarded_for(header);
                        }
                        Ok(resp)
                    };

                    let upgraded = tokio_tungstenite::accept_hdr_async(stream, callback).await;
                    match upgraded {
                        Ok(ws_stream) => {
                            let real =
                                resolve_real_ip(&forwarded, peer.ip(), &server.config.trust_proxy);
                            server.attach_with_addr(ws::spawn_carrier(ws_stream), Some(real));
                        }
                        Err(e) => debug!("websocket upgrade from {} failed: {}", peer, e),
                    }
                });
            }
        }))
    }
}

/// One handshake plus the create-or-resume decision.
async fn handle_connection(
    server: TunnelServer,
    mut transport: Transport,
    remote_addr: Option<IpAddr>,
) {
    let params = ServerHandshakeParams {
        root_keys: &server.config.keypair,
        allow_disable_encryption: server.config.allow_disable_encryption,
        read_timeout: server.config.handshake_timeout,
    };

    let outcome = match server_handshake(&mut transport, &params).await {
        Ok(outcome) => outcome,
        Err(e) => {
            debug!("handshake failed: {}", e);
            transport
                .sink
                .close(false, Some(format!("handshake failed: {}", e)));
            return;
        }
    };

    let short = &outcome.session_id[..16.min(outcome.session_id.len())];

    // Resume when a live session holds this ID; otherwise create one.
    let existing = {
        let sessions = server.sessions.read().await;
        sessions.get(&outcome.session_id).cloned()
    }
    .filter(|session| !session.is_closed());

    if let Some(session) = existing {
        info!("session {}..: resumed on a new transport", short);
        if send_session_result(&transport.sink, &outcome, false).is_err() {
            transport.sink.close(false, Some("result write failed".into()));
            return;
        }
        session.set_remote_addr(remote_addr).await;
        let _ = session
            .attach_transport(transport, outcome.key_stack, outcome.protocol_version, false)
            .await;
        return;
    }

    info!("session {}..: established (v{})", short, outcome.protocol_version);

    let (session_lifecycle_tx, mut session_lifecycle_rx) = mpsc::unbounded_channel();
    let settings = SessionSettings {
        ping_interval: server.config.ping_interval,
        ping_timeout: server.config.ping_timeout,
        avg_ping_count: server.config.avg_ping_count,
        reconnect_on_close: false,
    };
    let (session, session_events) = Session::new(
        outcome.session_id.clone(),
        false,
        outcome.protocol_version,
        outcome.key_stack.clone(),
        settings,
        session_lifecycle_tx,
    );

    // Forward this session's lifecycle into the server loop, tagged by ID.
    {
        let lifecycle_tx = server.lifecycle_tx.clone();
        let session_id = outcome.session_id.clone();
        tokio::spawn(async move {
            while let Some(signal) = session_lifecycle_rx.recv().await {
                if lifecycle_tx.send((session_id.clone(), signal)).is_err() {
                    break;
                }
            }
        });
    }

    server
        .sessions
        .write()
        .await
        .insert(outcome.session_id.clone(), session.clone());

    if send_session_result(&transport.sink, &outcome, true).is_err() {
        server.sessions.write().await.remove(&outcome.session_id);
        transport.sink.close(false, Some("result write failed".into()));
        return;
    }

    session.set_remote_addr(remote_addr).await;
    if session
        .attach_transport(transport, outcome.key_stack, outcome.protocol_version, false)
        .await
        .is_ok()
    {
        let _ = server.events_tx.send(ServerEvent::Connection {
            session,
            events: session_events,
        });
    }
}

/// Reconnect-window bookkeeping: arm a one-shot timer on disconnect, cancel
/// it on reconnect, expire the session when it fires.
async fn run_lifecycle(
    mut lifecycle_rx: mpsc::UnboundedReceiver<(String, Lifecycle)>,
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    events_tx: mpsc::UnboundedSender<ServerEvent>,
    stream_timeout: Duration,
) {
    let mut timers: HashMap<String, JoinHandle<()>> = HashMap::new();

    while let Some((session_id, signal)) = lifecycle_rx.recv().await {
        match signal {
            Lifecycle::Connected => {
                if let Some(timer) = timers.remove(&session_id) {
                    timer.abort();
                }
            }
            Lifecycle::Disconnected => {
                let sessions = sessions.clone();
                let events_tx = events_tx.clone();
                let sid = session_id.clone();
                let timer = tokio::spawn(async move {
                    tokio::time::sleep(stream_timeout).await;

                    let expired = sessions.write().await.remove(&sid);
                    if let Some(session) = expired {
                        info!(
                            "session {}..: reconnect window elapsed",
                            &sid[..16.min(sid.len())]
                        );
                        session.expire().await;
                        let _ = events_tx.send(ServerEvent::DropConnection { session_id: sid });
                    }
                });

                if let Some(previous) = timers.insert(session_id, timer) {
                    previous.abort();
                }
            }
            Lifecycle::Destroyed => {
                if let Some(timer) = timers.remove(&session_id) {
                    timer.abort();
                }
                sessions.write().await.remove(&session_id);
            }
        }
    }
}
