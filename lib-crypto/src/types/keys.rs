//! Hybrid key types and the client-side pin set
//!
//! A hybrid public key is the Ed25519 public key followed by the Dilithium5
//! public key; the private key is the two secret halves in the same order.
//! Hex serializations are lowercase, contiguous, with no delimiters.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::hashing::sha256;
use crate::post_quantum::constants::{
    COMBINED_PUBLIC_KEY_BYTES, COMBINED_SECRET_KEY_BYTES, DILITHIUM5_PUBLIC_KEY_BYTES,
    DILITHIUM5_SECRET_KEY_BYTES, ED25519_PUBLIC_KEY_BYTES, ED25519_SECRET_KEY_BYTES,
};

/// Hybrid public key: Ed25519 then Dilithium5.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    /// Ed25519 public key (32 bytes)
    pub classic: Vec<u8>,
    /// Dilithium5 public key (2592 bytes)
    pub pq: Vec<u8>,
}

impl PublicKey {
    /// Parse the concatenated `classic || pq` form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != COMBINED_PUBLIC_KEY_BYTES {
            return Err(anyhow::anyhow!(
                "Invalid public key length: {} (expected {})",
                bytes.len(),
                COMBINED_PUBLIC_KEY_BYTES
            ));
        }
        Ok(Self {
            classic: bytes[..ED25519_PUBLIC_KEY_BYTES].to_vec(),
            pq: bytes[ED25519_PUBLIC_KEY_BYTES..].to_vec(),
        })
    }

    /// Parse the lowercase hex serialization.
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|_| anyhow::anyhow!("Invalid public key hex"))?;
        Self::from_bytes(&bytes)
    }

    /// Concatenated `classic || pq` bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(COMBINED_PUBLIC_KEY_BYTES);
        bytes.extend_from_slice(&self.classic);
        bytes.extend_from_slice(&self.pq);
        bytes
    }

    /// Lowercase contiguous hex of the concatenated form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// SHA-256 of the concatenated form; the hash the pin set matches on.
    pub fn fingerprint(&self) -> [u8; 32] {
        sha256(&self.to_bytes())
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({}..)", &hex::encode(self.fingerprint())[..16])
    }
}

/// Hybrid private key: Ed25519 scalar then Dilithium5 secret key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey {
    /// Ed25519 private scalar (32 bytes)
    pub classic: Vec<u8>,
    /// Dilithium5 secret key (4864 bytes)
    pub pq: Vec<u8>,
}

impl PrivateKey {
    /// Parse the concatenated `classic || pq` form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != COMBINED_SECRET_KEY_BYTES {
            return Err(anyhow::anyhow!(
                "Invalid private key length: {} (expected {})",
                bytes.len(),
                COMBINED_SECRET_KEY_BYTES
            ));
        }
        Ok(Self {
            classic: bytes[..ED25519_SECRET_KEY_BYTES].to_vec(),
            pq: bytes[ED25519_SECRET_KEY_BYTES..].to_vec(),
        })
    }

    /// Parse the lowercase hex serialization.
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|_| anyhow::anyhow!("Invalid private key hex"))?;
        Self::from_bytes(&bytes)
    }

    /// Concatenated `classic || pq` bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(COMBINED_SECRET_KEY_BYTES);
        bytes.extend_from_slice(&self.classic);
        bytes.extend_from_slice(&self.pq);
        bytes
    }

    /// Lowercase contiguous hex of the concatenated form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Secret material stays out of logs.
        write!(f, "PrivateKey({} bytes)", self.classic.len() + self.pq.len())
    }
}

/// One acceptable representation of the server's root identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerKeyPin {
    /// Full `classic || pq` public key bytes.
    Key(Vec<u8>),
    /// SHA-256 of the full public key.
    Hash(Vec<u8>),
    /// Accept any server. Disables identity verification entirely.
    NoVerify,
}

impl ServerKeyPin {
    /// Full key pin from hex.
    pub fn key_from_hex(s: &str) -> Result<Self> {
        Ok(Self::Key(
            hex::decode(s).map_err(|_| anyhow::anyhow!("Invalid pin hex"))?,
        ))
    }

    /// Hash pin from hex.
    pub fn hash_from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|_| anyhow::anyhow!("Invalid pin hex"))?;
        if bytes.len() != 32 {
            return Err(anyhow::anyhow!("Hash pin must be 32 bytes"));
        }
        Ok(Self::Hash(bytes))
    }
}

/// True when the pin set accepts any server.
pub fn pin_set_allows_any(pins: &[ServerKeyPin]) -> bool {
    pins.iter().any(|p| matches!(p, ServerKeyPin::NoVerify))
}

/// True when every pin carries the full key, so hash-only delivery from the
/// server suffices to resolve the pinned key locally.
pub fn pin_set_all_keys(pins: &[ServerKeyPin]) -> bool {
    !pins.is_empty() && pins.iter().all(|p| matches!(p, ServerKeyPin::Key(_)))
}

/// Match a delivered full public key against the pin set.
pub fn pin_set_matches_key(pins: &[ServerKeyPin], delivered: &[u8]) -> bool {
    let digest = sha256(delivered);
    pins.iter().any(|pin| match pin {
        ServerKeyPin::Key(k) => k[..] == delivered[..],
        ServerKeyPin::Hash(h) => h[..] == digest[..],
        ServerKeyPin::NoVerify => true,
    })
}

/// Resolve the pinned full key whose SHA-256 equals a delivered hash.
pub fn pin_set_resolve_by_hash<'a>(
    pins: &'a [ServerKeyPin],
    delivered_hash: &[u8],
) -> Option<&'a [u8]> {
    pins.iter().find_map(|pin| match pin {
        ServerKeyPin::Key(k) if sha256(k)[..] == delivered_hash[..] => Some(k.as_slice()),
        _ => None,
    })
}
