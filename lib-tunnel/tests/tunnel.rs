//! End-to-end tunnel scenarios over in-memory transports
//!
//! Each test stands up a real server and client, handshake included; only
//! the byte carrier is simulated.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;

use lib_tunnel::testing::test_utils::{
    hash_pins, key_pins, memory_client_config, memory_factory, test_server_config,
};
use lib_tunnel::transport::memory::memory_pair;
use lib_tunnel::transport::TransportEvent;
use lib_tunnel::{
    HandshakeV1, KeyPair, ServerEvent, Session, SessionEvent, TransportSink, TunnelClient,
    TunnelError, TunnelServer,
};

const ECHO_PAYLOAD: [u8; 8] = [0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07];

/// Route tunnel logs through the test harness. Safe to call per test; only
/// the first initialization wins.
fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Echo every payload back over QoS-1, for every connecting session.
fn spawn_echo(mut events: mpsc::UnboundedReceiver<ServerEvent>) {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let ServerEvent::Connection {
                session,
                events: mut session_events,
            } = event
            {
                tokio::spawn(async move {
                    while let Some(event) = session_events.recv().await {
                        if let SessionEvent::Data(payload) = event {
                            let _ = session.send_reliable(&payload).await;
                        }
                    }
                });
            }
        }
    });
}

async fn wait_for_data(
    events: &mut mpsc::UnboundedReceiver<SessionEvent>,
    wait: Duration,
) -> Vec<u8> {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match timeout(remaining, events.recv()).await {
            Ok(Some(SessionEvent::Data(payload))) => return payload,
            Ok(Some(_)) => continue,
            other => panic!("expected data, got {:?}", other),
        }
    }
}

async fn echo_roundtrip(session: &Session, events: &mut mpsc::UnboundedReceiver<SessionEvent>) {
    session.send_reliable(&ECHO_PAYLOAD).await.unwrap();
    let echoed = wait_for_data(events, Duration::from_secs(10)).await;
    assert_eq!(echoed, ECHO_PAYLOAD);
}

#[test]
fn hex_roundtrip_of_random_key_material() {
    let original = lib_tunnel::lib_crypto::random_bytes(100);
    let encoded = hex::encode(&original);
    assert!(encoded.chars().all(|c| !c.is_ascii_uppercase()));
    assert_eq!(hex::decode(&encoded).unwrap(), original);
}

#[tokio::test]
async fn echo_over_v2_encrypted() {
    init_logging();
    let config = test_server_config();
    let keypair = config.keypair.clone();
    let (server, server_events) = TunnelServer::new(config);
    spawn_echo(server_events);

    let (session, mut events) =
        TunnelClient::connect(memory_client_config(&server, key_pins(&keypair)))
            .await
            .unwrap();

    assert_eq!(session.protocol_version().await, 2);
    echo_roundtrip(&session, &mut events).await;
}

#[tokio::test]
async fn echo_over_v2_with_hash_pins() {
    init_logging();
    let config = test_server_config();
    let keypair = config.keypair.clone();
    let (server, server_events) = TunnelServer::new(config);
    spawn_echo(server_events);

    // Hash pins force full-key delivery (encryption mode 1).
    let (session, mut events) =
        TunnelClient::connect(memory_client_config(&server, hash_pins(&keypair)))
            .await
            .unwrap();

    echo_roundtrip(&session, &mut events).await;
}

#[tokio::test]
async fn echo_over_v1_forced() {
    init_logging();
    let config = test_server_config();
    let keypair = config.keypair.clone();
    let (server, server_events) = TunnelServer::new(config);
    spawn_echo(server_events);

    let client_config = memory_client_config(&server, key_pins(&keypair))
        .with_handshake_v1(HandshakeV1::Forced);
    let (session, mut events) = TunnelClient::connect(client_config).await.unwrap();

    assert_eq!(session.protocol_version().await, 1);
    echo_roundtrip(&session, &mut events).await;
}

#[tokio::test]
async fn echo_with_encryption_disabled() {
    init_logging();
    let config = test_server_config().with_allow_disable_encryption(true);
    let keypair = config.keypair.clone();
    let (server, server_events) = TunnelServer::new(config);
    spawn_echo(server_events);

    let client_config =
        memory_client_config(&server, key_pins(&keypair)).with_disable_encryption(true);
    let (session, mut events) = TunnelClient::connect(client_config).await.unwrap();

    assert_eq!(session.protocol_version().await, 2);
    echo_roundtrip(&session, &mut events).await;
}

#[tokio::test]
async fn disable_encryption_refused_without_server_opt_in() {
    init_logging();
    let config = test_server_config();
    let keypair = config.keypair.clone();
    let (server, _server_events) = TunnelServer::new(config);

    let client_config =
        memory_client_config(&server, key_pins(&keypair)).with_disable_encryption(true);
    let result = TunnelClient::connect(client_config).await;

    match result {
        Err(TunnelError::EncryptionRefused) => {}
        other => panic!("expected refusal, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn pin_mismatch_aborts_without_retry() {
    init_logging();
    let config = test_server_config();
    let (server, _server_events) = TunnelServer::new(config);

    // Pin a different key's hash; count dial attempts through the factory.
    let wrong = KeyPair::generate().unwrap();
    let attempts = Arc::new(AtomicUsize::new(0));
    let inner_factory = memory_factory(&server);
    let counting: lib_tunnel::TransportFactory = {
        let attempts = attempts.clone();
        Arc::new(move || {
            attempts.fetch_add(1, Ordering::SeqCst);
            inner_factory()
        })
    };

    let client_config = lib_tunnel::ClientConfig::with_transport_factory(
        hash_pins(&wrong),
        counting,
    )
    .with_timeout(Duration::from_secs(5))
    .with_reconnection_time(Duration::from_millis(50));

    let result = TunnelClient::connect(client_config).await;
    match result {
        Err(TunnelError::PinMismatch) => {}
        other => panic!("expected pin mismatch, got {:?}", other.map(|_| ())),
    }
    assert_eq!(attempts.load(Ordering::SeqCst), 1, "no retry after pin mismatch");
}

#[tokio::test]
async fn resume_redelivers_unacked_payload_exactly_once() {
    init_logging();
    let config = test_server_config();
    let keypair = config.keypair.clone();
    let (server, mut server_events) = TunnelServer::new(config);

    // Collect server-side deliveries and connection count; no echoing.
    let received: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
    let connections = Arc::new(AtomicUsize::new(0));
    {
        let received = received.clone();
        let connections = connections.clone();
        tokio::spawn(async move {
            while let Some(event) = server_events.recv().await {
                if let ServerEvent::Connection {
                    events: mut session_events,
                    ..
                } = event
                {
                    connections.fetch_add(1, Ordering::SeqCst);
                    let received = received.clone();
                    tokio::spawn(async move {
                        while let Some(event) = session_events.recv().await {
                            if let SessionEvent::Data(payload) = event {
                                received.lock().await.push(payload);
                            }
                        }
                    });
                }
            }
        });
    }

    // Factory that remembers each client-side sink so the test can kill the
    // live transport underneath the session.
    let sinks: Arc<Mutex<Vec<TransportSink>>> = Arc::new(Mutex::new(Vec::new()));
    let factory: lib_tunnel::TransportFactory = {
        let server = server.clone();
        let sinks = sinks.clone();
        Arc::new(move || {
            let server = server.clone();
            let sinks = sinks.clone();
            Box::pin(async move {
                let (client_side, server_side) = memory_pair();
                sinks.lock().await.push(client_side.sink.clone());
                server.attach(server_side);
                Ok(client_side)
            })
        })
    };

    let client_config = lib_tunnel::ClientConfig::with_transport_factory(key_pins(&keypair), factory)
        .with_timeout(Duration::from_secs(5))
        .with_ping_interval(Duration::from_millis(200))
        .with_reconnection_time(Duration::from_millis(100));

    let (session, mut events) = TunnelClient::connect(client_config).await.unwrap();

    // Kill the transport, then send while disconnected.
    sinks.lock().await[0].close(false, Some("killed".into()));

    let payload = b"survives the outage".to_vec();
    let send = {
        let session = session.clone();
        let payload = payload.clone();
        tokio::spawn(async move { session.send_reliable(&payload).await })
    };

    // The sender settles only after reconnect + redelivery + ack.
    let result = timeout(Duration::from_secs(15), send).await.unwrap().unwrap();
    assert!(result.is_ok(), "send must resolve after resume: {:?}", result);

    // The client observed the outage and the recovery.
    let mut saw_disconnect = false;
    let mut saw_reconnect = false;
    while let Ok(event) = events.try_recv() {
        match event {
            SessionEvent::Disconnected { .. } => saw_disconnect = true,
            SessionEvent::Connected if saw_disconnect => saw_reconnect = true,
            _ => {}
        }
    }
    assert!(saw_disconnect && saw_reconnect);

    // Give any stray duplicate a chance to land, then assert exactly-once.
    tokio::time::sleep(Duration::from_millis(500)).await;
    let deliveries = received.lock().await;
    let copies = deliveries.iter().filter(|p| **p == payload).count();
    assert_eq!(copies, 1, "payload must reach the app exactly once");

    // The resume reused the session: no second Connection event.
    assert_eq!(connections.load(Ordering::SeqCst), 1);
    assert_eq!(server.session_count().await, 1);
}

#[tokio::test]
async fn reconnect_after_server_drop_reports_resume_failure() {
    init_logging();
    let config = test_server_config().with_stream_timeout(Duration::from_millis(200));
    let keypair = config.keypair.clone();
    let (server, mut server_events) = TunnelServer::new(config);

    let dropped = Arc::new(AtomicUsize::new(0));
    {
        let dropped = dropped.clone();
        tokio::spawn(async move {
            while let Some(event) = server_events.recv().await {
                if let ServerEvent::DropConnection { .. } = event {
                    dropped.fetch_add(1, Ordering::SeqCst);
                }
            }
        });
    }

    let sinks: Arc<Mutex<Vec<TransportSink>>> = Arc::new(Mutex::new(Vec::new()));
    let factory: lib_tunnel::TransportFactory = {
        let server = server.clone();
        let sinks = sinks.clone();
        Arc::new(move || {
            let server = server.clone();
            let sinks = sinks.clone();
            Box::pin(async move {
                let (client_side, server_side) = memory_pair();
                sinks.lock().await.push(client_side.sink.clone());
                server.attach(server_side);
                Ok(client_side)
            })
        })
    };

    // Reconnect slower than the server's window so the session expires.
    let client_config = lib_tunnel::ClientConfig::with_transport_factory(key_pins(&keypair), factory)
        .with_timeout(Duration::from_secs(5))
        .with_reconnection_time(Duration::from_millis(600));

    let (_session, mut events) = TunnelClient::connect(client_config).await.unwrap();

    sinks.lock().await[0].close(false, Some("killed".into()));

    let mut saw_resume_failed = false;
    let mut saw_reconnect = false;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while tokio::time::Instant::now() < deadline && !(saw_resume_failed && saw_reconnect) {
        match timeout(Duration::from_secs(5), events.recv()).await {
            Ok(Some(SessionEvent::ResumeFailed)) => saw_resume_failed = true,
            Ok(Some(SessionEvent::Connected)) if saw_resume_failed => saw_reconnect = true,
            Ok(Some(_)) => continue,
            _ => break,
        }
    }

    assert!(saw_resume_failed, "client must learn the server dropped it");
    assert!(saw_reconnect, "client must still come back up");
    assert_eq!(dropped.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn graceful_close_reaches_the_peer() {
    init_logging();
    let config = test_server_config();
    let keypair = config.keypair.clone();
    let (server, mut server_events) = TunnelServer::new(config);

    let server_session: Arc<Mutex<Option<Session>>> = Arc::new(Mutex::new(None));
    {
        let server_session = server_session.clone();
        tokio::spawn(async move {
            while let Some(event) = server_events.recv().await {
                if let ServerEvent::Connection { session, .. } = event {
                    *server_session.lock().await = Some(session);
                }
            }
        });
    }

    let (session, mut events) =
        TunnelClient::connect(memory_client_config(&server, key_pins(&keypair)))
            .await
            .unwrap();

    // Let the server-side session land, then close from the server.
    let held = timeout(Duration::from_secs(5), async {
        loop {
            if let Some(s) = server_session.lock().await.clone() {
                return s;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();
    held.close().await;

    let mut saw_final = false;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        match timeout(Duration::from_secs(5), events.recv()).await {
            Ok(Some(SessionEvent::FinalClose)) => {
                saw_final = true;
                break;
            }
            Ok(Some(_)) => continue,
            _ => break,
        }
    }
    assert!(saw_final);
    assert!(session.is_closed());
}

#[tokio::test]
async fn unsupported_version_reply_lists_what_the_server_speaks() {
    init_logging();
    let config = test_server_config();
    let (server, _server_events) = TunnelServer::new(config);

    let (mut client_side, server_side) = memory_pair();
    server.attach(server_side);

    // Request protocol version 9 by hand.
    let init = rmp_serde::to_vec(&(1u8, 9u8, vec![9u8], 0u8)).unwrap();
    let mut frame = vec![0x02];
    frame.extend(init);
    client_side.sink.send(frame).unwrap();

    let reply = timeout(Duration::from_secs(5), client_side.events.recv())
        .await
        .unwrap();
    match reply {
        Some(TransportEvent::Frame(bytes)) => {
            assert_eq!(&bytes[..3], &[0x02, 0x02, 0x04]);
            let (supported,): (Vec<u8>,) = rmp_serde::from_slice(&bytes[3..]).unwrap();
            assert_eq!(supported, vec![2, 1]);
        }
        other => panic!("expected version list, got {:?}", other),
    }
}
