//! Dual signing and verification
//!
//! Every authenticated handshake value is signed twice, once per key family,
//! and accepted only when both signatures verify.

use anyhow::Result;

use crate::classical::ed25519::{ed25519_sign, ed25519_verify};
use crate::keypair::generation::KeyPair;
use crate::post_quantum::dilithium::{dilithium5_sign, dilithium5_verify};
use crate::types::keys::PublicKey;

impl KeyPair {
    /// Sign with both halves. Returns `(classic_signature, pq_signature)`.
    pub fn sign(&self, message: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
        let classic = ed25519_sign(message, &self.private_key.classic)?;
        let pq = dilithium5_sign(message, &self.private_key.pq)?;
        Ok((classic, pq))
    }
}

impl PublicKey {
    /// Verify both signature halves; true only when both check out.
    pub fn verify(&self, message: &[u8], sig_classic: &[u8], sig_pq: &[u8]) -> Result<bool> {
        if !ed25519_verify(message, sig_classic, &self.classic)? {
            return Ok(false);
        }
        dilithium5_verify(message, sig_pq, &self.pq)
    }
}
