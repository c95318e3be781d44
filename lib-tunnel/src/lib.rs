//! ProtoV2d Tunnel - resumable quantum-resistant message transport
//!
//! A message-oriented tunnel layered over any reliable duplex byte stream
//! (typically a WebSocket). The server holds a long-lived hybrid root
//! identity (Ed25519 + Dilithium5); clients authenticate sessions by
//! possession of a hybrid session signing key. Features:
//!
//! - Two-version handshake negotiating post-quantum + classical hybrid key
//!   agreement (Kyber-1024 + X25519) with mutual proof of possession
//! - Layered AES-256-GCM data framing with per-version integrity digests
//! - QoS-1 at-least-once delivery with acknowledgement, retry, and
//!   duplicate suppression
//! - Session resumption: a client that reconnects within the server's
//!   window keeps its session and its unacknowledged outbox
//! - Keepalive with RTT tracking and proxy-chain client IP resolution

// Re-exports for external use
pub use crate::client::{ClientConfig, TransportFactory, TunnelClient};
pub use crate::error::TunnelError;
pub use crate::handshake::HandshakeV1;
pub use crate::server::{ServerConfig, ServerEvent, TunnelServer};
pub use crate::session::{Session, SessionEvent, SessionSettings};
pub use crate::transport::{Transport, TransportEvent, TransportSink};
pub use crate::utils::real_ip::{resolve_real_ip, Cidr, TrustProxy};

// The key types callers hold pins and identities with
pub use lib_crypto::{KeyPair, PrivateKey, PublicKey, ServerKeyPin};

// Core modules
pub mod client;
pub mod constants;
pub mod error;
pub mod handshake;
pub mod server;
pub mod session;
pub mod testing;
pub mod transport;
pub mod utils;

// Direct access to the crypto facade
pub use lib_crypto;
