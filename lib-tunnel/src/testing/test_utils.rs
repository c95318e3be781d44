//! Shared helpers for exercising a server and client in one process
//!
//! Everything runs over in-memory transport pairs; no sockets are opened.

use std::sync::Arc;
use std::time::Duration;

use lib_crypto::{KeyPair, ServerKeyPin};

use crate::client::{ClientConfig, TransportFactory};
use crate::server::{ServerConfig, TunnelServer};
use crate::transport::memory::memory_pair;

/// A server config with a fresh identity and timings suited to tests.
pub fn test_server_config() -> ServerConfig {
    let keypair = KeyPair::generate().expect("keypair generation");
    ServerConfig::from_keypair(keypair)
        .with_stream_timeout(Duration::from_secs(5))
        .with_ping_interval(Duration::from_millis(200))
        .with_ping_timeout(Duration::from_secs(2))
}

/// Pin set matching a server keypair by full key.
pub fn key_pins(keypair: &KeyPair) -> Vec<ServerKeyPin> {
    vec![ServerKeyPin::Key(keypair.public_key.to_bytes())]
}

/// Pin set matching a server keypair by hash.
pub fn hash_pins(keypair: &KeyPair) -> Vec<ServerKeyPin> {
    vec![ServerKeyPin::Hash(keypair.public_key.fingerprint().to_vec())]
}

/// A transport factory that attaches the far side of each in-memory pair to
/// the given server, simulating one dial per call.
pub fn memory_factory(server: &TunnelServer) -> TransportFactory {
    let server = server.clone();
    Arc::new(move || {
        let server = server.clone();
        Box::pin(async move {
            let (client_side, server_side) = memory_pair();
            server.attach(server_side);
            Ok(client_side)
        })
    })
}

/// Client config wired to a server through in-memory transports, with test
/// timings.
pub fn memory_client_config(server: &TunnelServer, pins: Vec<ServerKeyPin>) -> ClientConfig {
    ClientConfig::with_transport_factory(pins, memory_factory(server))
        .with_timeout(Duration::from_secs(5))
        .with_ping_interval(Duration::from_millis(200))
        .with_reconnection_time(Duration::from_millis(100))
}
