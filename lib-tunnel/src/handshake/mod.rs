//! Handshake Engine
//!
//! Per-connection state machines negotiating the protocol version, deriving
//! the layered AES-GCM key stack, verifying the server identity against the
//! client's pin set, and proving client session-key possession.
//!
//! Two wire dialects exist:
//!
//! - **v2**: binary packets with fixed offsets, hybrid X25519 + Kyber-1024
//!   key agreement, doubly-encrypted session proof.
//! - **v1** (legacy): MessagePack records, Kyber-only key agreement, the
//!   `F3 11` composite-signature sentinel and the double-SHA-512 challenge.
//!
//! Any signature failure, pin mismatch, malformed record, or frame arriving
//! outside the expected step aborts with a non-recoverable error; callers
//! close the transport and keep no partial state.

pub mod client;
pub mod records;
pub mod server;

pub use client::{client_handshake, ClientHandshakeParams, ClientOutcome};
pub use server::{send_session_result, server_handshake, ServerHandshakeParams, ServerOutcome};

use lib_crypto::{sha512, PublicKey};

use crate::constants::PROTOCOL_V1;
use crate::utils::bytes::concat;

/// Legacy handshake version selection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeV1 {
    /// Prefer v2, fall back to v1 when the server lists only v1.
    Auto,
    /// Speak v1 unconditionally.
    Forced,
    /// Never speak v1; a v1-only server is a non-recoverable failure.
    Disabled,
}

/// The session ID a public key maps to under a protocol version.
///
/// v2 identifies a session by the full hybrid public key; v1 by the
/// Dilithium half alone, so the same keypair yields distinct IDs per version.
pub fn session_id_for(version: u8, public: &PublicKey) -> String {
    if version == PROTOCOL_V1 {
        hex::encode(&public.pq)
    } else {
        public.to_hex()
    }
}

/// The v1 challenge bytes derived from the server's random seed string:
/// `SHA-512( SHA-512("") || SHA-512(seed) )`. The empty-string inner hash is
/// a fixed part of the legacy construction and must not be simplified away.
pub fn legacy_challenge(seed: &str) -> [u8; 64] {
    let empty = sha512(b"");
    let seeded = sha512(seed.as_bytes());
    sha512(&concat(&[&empty, &seeded]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lib_crypto::KeyPair;

    #[test]
    fn test_session_ids_differ_by_version() -> anyhow::Result<()> {
        let keys = KeyPair::generate()?;
        let v1 = session_id_for(1, &keys.public_key);
        let v2 = session_id_for(2, &keys.public_key);

        assert_eq!(v1.len(), 2592 * 2);
        assert_eq!(v2.len(), 2624 * 2);
        assert!(v2.ends_with(&v1));
        Ok(())
    }

    #[test]
    fn test_legacy_challenge_shape() {
        let a = legacy_challenge("seed");
        let b = legacy_challenge("seed");
        let c = legacy_challenge("seeds");

        assert_eq!(a, b);
        assert_ne!(a, c);
        // Not a plain hash of the seed; the nested construction must hold.
        assert_ne!(a, sha512(b"seed"));
    }
}
