//! CRYSTALS-Kyber-1024 wrapper functions
//!
//! The 32-byte shared secret is used directly as an AES-256-GCM key; both
//! sides import the raw secret with no further derivation.

use anyhow::Result;
use pqcrypto_kyber::kyber1024;
use pqcrypto_traits::kem::{
    Ciphertext, PublicKey as KemPublicKey, SecretKey as KemSecretKey, SharedSecret,
};

/// Generate a Kyber-1024 keypair, returned as `(public, private)` raw bytes.
pub fn kyber1024_keypair() -> (Vec<u8>, Vec<u8>) {
    let (pk, sk) = kyber1024::keypair();
    (pk.as_bytes().to_vec(), sk.as_bytes().to_vec())
}

/// Encapsulate to a peer public key. Returns `(ciphertext, shared_secret)`.
pub fn kyber1024_encapsulate(public_key: &[u8]) -> Result<(Vec<u8>, [u8; 32])> {
    let pk = kyber1024::PublicKey::from_bytes(public_key)
        .map_err(|_| anyhow::anyhow!("Invalid Kyber-1024 public key"))?;

    let (ss, ct) = kyber1024::encapsulate(&pk);

    let mut shared_secret = [0u8; 32];
    shared_secret.copy_from_slice(ss.as_bytes());
    Ok((ct.as_bytes().to_vec(), shared_secret))
}

/// Decapsulate a ciphertext with our secret key.
pub fn kyber1024_decapsulate(ciphertext: &[u8], secret_key: &[u8]) -> Result<[u8; 32]> {
    let sk = kyber1024::SecretKey::from_bytes(secret_key)
        .map_err(|_| anyhow::anyhow!("Invalid Kyber-1024 secret key"))?;
    let ct = kyber1024::Ciphertext::from_bytes(ciphertext)
        .map_err(|_| anyhow::anyhow!("Invalid Kyber-1024 ciphertext"))?;

    let ss = kyber1024::decapsulate(&ct, &sk);

    let mut shared_secret = [0u8; 32];
    shared_secret.copy_from_slice(ss.as_bytes());
    Ok(shared_secret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::post_quantum::constants::{
        KYBER1024_CIPHERTEXT_BYTES, KYBER1024_PUBLIC_KEY_BYTES,
    };

    #[test]
    fn test_kem_roundtrip() -> Result<()> {
        let (pk, sk) = kyber1024_keypair();
        assert_eq!(pk.len(), KYBER1024_PUBLIC_KEY_BYTES);

        let (ciphertext, shared1) = kyber1024_encapsulate(&pk)?;
        assert_eq!(ciphertext.len(), KYBER1024_CIPHERTEXT_BYTES);

        let shared2 = kyber1024_decapsulate(&ciphertext, &sk)?;
        assert_eq!(shared1, shared2);

        Ok(())
    }

    #[test]
    fn test_rejects_truncated_inputs() {
        let (pk, sk) = kyber1024_keypair();
        assert!(kyber1024_encapsulate(&pk[..100]).is_err());

        let (ciphertext, _) = kyber1024_encapsulate(&pk).unwrap();
        assert!(kyber1024_decapsulate(&ciphertext[..100], &sk).is_err());
    }
}
