//! X25519 ephemeral Diffie-Hellman
//!
//! One exchange object per handshake; the secret scalar is consumed by the
//! agreement and cannot be reused.

use anyhow::Result;
use rand::rngs::OsRng;
use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey};

/// A single-use X25519 exchange. Created fresh per connection attempt.
pub struct X25519Exchange {
    secret: EphemeralSecret,
    public: [u8; 32],
}

impl X25519Exchange {
    /// Generate a fresh ephemeral keypair.
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random_from_rng(OsRng);
        let public = X25519PublicKey::from(&secret).to_bytes();
        Self { secret, public }
    }

    /// Raw 32-byte public key for the wire.
    pub fn public_bytes(&self) -> [u8; 32] {
        self.public
    }

    /// Complete the agreement against the peer's 32-byte public key,
    /// consuming the secret. Returns the raw 32-byte shared secret.
    pub fn agree(self, peer_public: &[u8]) -> Result<[u8; 32]> {
        if peer_public.len() != 32 {
            return Err(anyhow::anyhow!("Invalid X25519 public key length"));
        }

        let mut pk_bytes = [0u8; 32];
        pk_bytes.copy_from_slice(peer_public);
        let shared = self.secret.diffie_hellman(&X25519PublicKey::from(pk_bytes));
        Ok(shared.to_bytes())
    }
}
