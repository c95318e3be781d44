//! Tunnel client endpoint
//!
//! Dials a transport, runs the client handshake, and supervises the session:
//! recoverable failures schedule a reconnect with the same session keypair,
//! non-recoverable failures abort. A successful reconnect swaps the new
//! transport into the existing session object, which re-arms its outbox.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use lib_crypto::{KeyPair, ServerKeyPin};

use crate::constants::{
    DEFAULT_AVG_PING_COUNT, DEFAULT_PING_INTERVAL, DEFAULT_RECONNECTION_TIME, DEFAULT_TIMEOUT,
    PROTOCOL_V1,
};
use crate::error::TunnelError;
use crate::handshake::{client_handshake, ClientHandshakeParams, HandshakeV1};
use crate::session::{Lifecycle, Session, SessionEvent, SessionSettings};
use crate::transport::{ws, Transport};

/// Produces a fresh transport per connection attempt.
pub type TransportFactory =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = Result<Transport, TunnelError>> + Send>> + Send + Sync>;

/// Client configuration. A pin set plus either a URL or a transport factory
/// is required.
#[derive(Clone)]
pub struct ClientConfig {
    pub pins: Vec<ServerKeyPin>,
    pub url: Option<String>,
    pub transport_factory: Option<TransportFactory>,
    /// Handshake read deadline and keepalive pong deadline.
    pub timeout: Duration,
    pub ping_interval: Duration,
    pub reconnection_time: Duration,
    /// Attempt cap before the first session is established; `None` retries
    /// without bound.
    pub max_initial_retries: Option<u32>,
    pub handshake_v1: HandshakeV1,
    pub disable_encryption: bool,
    /// Reconnect fresh even after the server closed the session gracefully.
    pub always_reconnect: bool,
    pub avg_ping_count: usize,
    /// Session signing keypair; generated when absent. Supplying the same
    /// keypair across processes resumes the same logical session.
    pub session_keys: Option<KeyPair>,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>, pins: Vec<ServerKeyPin>) -> Self {
        Self {
            pins,
            url: Some(url.into()),
            transport_factory: None,
            timeout: DEFAULT_TIMEOUT,
            ping_interval: DEFAULT_PING_INTERVAL,
            reconnection_time: DEFAULT_RECONNECTION_TIME,
            max_initial_retries: None,
            handshake_v1: HandshakeV1::Auto,
            disable_encryption: false,
            always_reconnect: false,
            avg_ping_count: DEFAULT_AVG_PING_COUNT,
            session_keys: None,
        }
    }

    /// Configuration with injected transports instead of a URL.
    pub fn with_transport_factory(pins: Vec<ServerKeyPin>, factory: TransportFactory) -> Self {
        let mut config = Self::new("", pins);
        config.url = None;
        config.transport_factory = Some(factory);
        config
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn with_reconnection_time(mut self, time: Duration) -> Self {
        self.reconnection_time = time;
        self
    }

    pub fn with_max_initial_retries(mut self, retries: u32) -> Self {
        self.max_initial_retries = Some(retries);
        self
    }

    pub fn with_handshake_v1(mut self, policy: HandshakeV1) -> Self {
        self.handshake_v1 = policy;
        self
    }

    pub fn with_disable_encryption(mut self, disable: bool) -> Self {
        self.disable_encryption = disable;
        self
    }

    pub fn with_always_reconnect(mut self, always: bool) -> Self {
        self.always_reconnect = always;
        self
    }

    pub fn with_session_keys(mut self, keys: KeyPair) -> Self {
        self.session_keys = Some(keys);
        self
    }
}

/// The client endpoint.
pub struct TunnelClient;

impl TunnelClient {
    /// Connect, handshake, and hand back the session plus its event stream.
    /// The reconnect supervisor keeps running in the background until the
    /// session is destroyed.
    pub async fn connect(
        config: ClientConfig,
    ) -> Result<(Session, mpsc::UnboundedReceiver<SessionEvent>), TunnelError> {
        let factory = resolve_factory(&config)?;
        let session_keys = match &config.session_keys {
            Some(keys) => keys.clone(),
            None => KeyPair::generate().map_err(TunnelError::crypto)?,
        };

        let mut request_v1 = matches!(config.handshake_v1, HandshakeV1::Forced);
        let mut attempts: u32 = 0;

        // Initial connection loop, bounded by `max_initial_retries`.
        let (outcome, transport) = loop {
            match attempt(&factory, &config, &session_keys, request_v1).await {
                Ok(done) => break done,
                Err(e) => {
                    if v1_fallback_allowed(&e, config.handshake_v1, request_v1) {
                        debug!("falling back to legacy handshake");
                        request_v1 = true;
                        continue;
                    }
                    if !e.is_recoverable() {
                        return Err(e);
                    }
                    attempts += 1;
                    if let Some(max) = config.max_initial_retries {
                        if attempts > max {
                            return Err(e);
                        }
                    }
                    debug!("connect attempt failed ({}), retrying", e);
                    tokio::time::sleep(config.reconnection_time).await;
                }
            }
        };

        info!(
            "session {}..: connected (v{})",
            &outcome.session_id[..16.min(outcome.session_id.len())],
            outcome.protocol_version
        );

        let (lifecycle_tx, lifecycle_rx) = mpsc::unbounded_channel();
        let settings = SessionSettings {
            ping_interval: config.ping_interval,
            ping_timeout: config.timeout,
            avg_ping_count: config.avg_ping_count,
            reconnect_on_close: config.always_reconnect,
        };
        let (session, events_rx) = Session::new(
            outcome.session_id.clone(),
            true,
            outcome.protocol_version,
            outcome.key_stack.clone(),
            settings,
            lifecycle_tx,
        );
        session
            .attach_transport(transport, outcome.key_stack, outcome.protocol_version, false)
            .await?;

        tokio::spawn(supervise(
            session.clone(),
            Arc::new(config),
            factory,
            session_keys,
            lifecycle_rx,
            request_v1,
        ));

        Ok((session, events_rx))
    }
}

fn resolve_factory(config: &ClientConfig) -> Result<TransportFactory, TunnelError> {
    if let Some(factory) = &config.transport_factory {
        return Ok(factory.clone());
    }
    match &config.url {
        Some(url) if !url.is_empty() => {
            let url = url.clone();
            Ok(Arc::new(move || {
                let url = url.clone();
                Box::pin(async move { ws::connect(&url).await })
            }))
        }
        _ => Err(TunnelError::Config(
            "a url or a transport factory is required".into(),
        )),
    }
}

/// One dial-plus-handshake attempt.
async fn attempt(
    factory: &TransportFactory,
    config: &ClientConfig,
    session_keys: &KeyPair,
    request_v1: bool,
) -> Result<(crate::handshake::ClientOutcome, Transport), TunnelError> {
    let mut transport = factory().await?;
    let params = ClientHandshakeParams {
        pins: &config.pins,
        session_keys,
        request_v1,
        v1_policy: config.handshake_v1,
        disable_encryption: config.disable_encryption,
        read_timeout: config.timeout,
    };

    match client_handshake(&mut transport, &params).await {
        Ok(outcome) => Ok((outcome, transport)),
        Err(e) => {
            transport
                .sink
                .close(false, Some(format!("handshake failed: {}", e)));
            Err(e)
        }
    }
}

/// Whether a version-mismatch reply permits retrying with the legacy flow.
fn v1_fallback_allowed(error: &TunnelError, policy: HandshakeV1, already_v1: bool) -> bool {
    if already_v1 || policy != HandshakeV1::Auto {
        return false;
    }
    matches!(
        error,
        TunnelError::VersionMismatch { supported } if supported.contains(&PROTOCOL_V1)
    )
}

/// Reconnect supervisor: wakes on transport loss, redials until the session
/// resumes or a non-recoverable failure destroys it.
async fn supervise(
    session: Session,
    config: Arc<ClientConfig>,
    factory: TransportFactory,
    session_keys: KeyPair,
    mut lifecycle_rx: mpsc::UnboundedReceiver<Lifecycle>,
    mut request_v1: bool,
) {
    loop {
        match lifecycle_rx.recv().await {
            None | Some(Lifecycle::Destroyed) => return,
            Some(Lifecycle::Connected) => continue,
            Some(Lifecycle::Disconnected) => {
                debug!("session {}..: transport lost, reconnecting", &session.id()[..16]);

                loop {
                    if session.is_closed() {
                        return;
                    }
                    tokio::time::sleep(config.reconnection_time).await;
                    if session.is_closed() {
                        return;
                    }

                    match attempt(&factory, &config, &session_keys, request_v1).await {
                        Ok((outcome, transport)) => {
                            // `new_session` on a reconnect means the server
                            // dropped us; delivery state restarts but the
                            // outbox is re-armed under the same dupIDs.
                            let resume_failed = outcome.new_session;
                            if resume_failed {
                                warn!(
                                    "session {}..: server lost the session, starting over",
                                    &session.id()[..16]
                                );
                            }
                            if session
                                .attach_transport(
                                    transport,
                                    outcome.key_stack,
                                    outcome.protocol_version,
                                    resume_failed,
                                )
                                .await
                                .is_err()
                            {
                                return;
                            }
                            break;
                        }
                        Err(e) => {
                            if v1_fallback_allowed(&e, config.handshake_v1, request_v1) {
                                request_v1 = true;
                                continue;
                            }
                            if e.is_recoverable() {
                                debug!("reconnect attempt failed ({}), retrying", e);
                                continue;
                            }
                            warn!("session {}..: reconnect aborted: {}", &session.id()[..16], e);
                            session.expire().await;
                            return;
                        }
                    }
                }
            }
        }
    }
}
