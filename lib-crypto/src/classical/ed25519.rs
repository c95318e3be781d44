//! Ed25519 signature wrappers
//!
//! The classical half of the hybrid identity. Key and signature formats on
//! the wire are the raw 32/64-byte forms with no framing.

use anyhow::Result;
use ed25519_dalek::{Signature as Ed25519Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::{rngs::OsRng, RngCore};

/// Generate an Ed25519 keypair, returned as `(public, private)` raw bytes.
pub fn ed25519_keypair() -> (Vec<u8>, Vec<u8>) {
    let mut rng = OsRng;
    let mut seed = [0u8; 32];
    rng.fill_bytes(&mut seed);

    let signing_key = SigningKey::from_bytes(&seed);
    let verifying_key = signing_key.verifying_key();

    (verifying_key.as_bytes().to_vec(), signing_key.as_bytes().to_vec())
}

/// Derive the keypair deterministically from a 32-byte seed.
pub fn ed25519_keypair_from_seed(seed: &[u8; 32]) -> (Vec<u8>, Vec<u8>) {
    let signing_key = SigningKey::from_bytes(seed);
    let verifying_key = signing_key.verifying_key();

    (verifying_key.as_bytes().to_vec(), signing_key.as_bytes().to_vec())
}

/// Recover the public key from a 32-byte private scalar.
pub fn ed25519_public_from_private(secret_key: &[u8]) -> Result<Vec<u8>> {
    if secret_key.len() != 32 {
        return Err(anyhow::anyhow!("Invalid Ed25519 secret key length"));
    }

    let mut seed = [0u8; 32];
    seed.copy_from_slice(secret_key);
    Ok(SigningKey::from_bytes(&seed).verifying_key().as_bytes().to_vec())
}

/// Sign a message, producing a 64-byte detached signature.
pub fn ed25519_sign(message: &[u8], secret_key: &[u8]) -> Result<Vec<u8>> {
    if secret_key.len() != 32 {
        return Err(anyhow::anyhow!("Invalid Ed25519 secret key length"));
    }

    let mut seed = [0u8; 32];
    seed.copy_from_slice(secret_key);
    let signing_key = SigningKey::from_bytes(&seed);

    Ok(signing_key.sign(message).to_bytes().to_vec())
}

/// Verify a detached Ed25519 signature. Malformed inputs verify as `false`
/// rather than erroring; the caller treats both the same way.
pub fn ed25519_verify(message: &[u8], signature: &[u8], public_key: &[u8]) -> Result<bool> {
    if signature.len() != 64 || public_key.len() != 32 {
        return Ok(false);
    }

    let sig = match Ed25519Signature::try_from(&signature[..64]) {
        Ok(sig) => sig,
        Err(_) => return Ok(false),
    };

    let mut pk_bytes = [0u8; 32];
    pk_bytes.copy_from_slice(&public_key[..32]);
    let verifying_key = match VerifyingKey::from_bytes(&pk_bytes) {
        Ok(key) => key,
        Err(_) => return Ok(false),
    };

    Ok(verifying_key.verify(message, &sig).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify_roundtrip() -> Result<()> {
        let (pk, sk) = ed25519_keypair();
        let message = b"tunnel challenge bytes";

        let signature = ed25519_sign(message, &sk)?;
        assert_eq!(signature.len(), 64);
        assert!(ed25519_verify(message, &signature, &pk)?);

        // Wrong message must fail
        assert!(!ed25519_verify(b"other bytes", &signature, &pk)?);

        Ok(())
    }

    #[test]
    fn test_deterministic_from_seed() {
        let seed = [7u8; 32];
        let (pk1, sk1) = ed25519_keypair_from_seed(&seed);
        let (pk2, sk2) = ed25519_keypair_from_seed(&seed);

        assert_eq!(pk1, pk2);
        assert_eq!(sk1, sk2);
    }

    #[test]
    fn test_public_recovery() -> Result<()> {
        let (pk, sk) = ed25519_keypair();
        assert_eq!(ed25519_public_from_private(&sk)?, pk);
        Ok(())
    }

    #[test]
    fn test_malformed_inputs_fail_closed() -> Result<()> {
        let (pk, sk) = ed25519_keypair();
        let signature = ed25519_sign(b"msg", &sk)?;

        assert!(!ed25519_verify(b"msg", &signature[..63], &pk)?);
        assert!(!ed25519_verify(b"msg", &signature, &pk[..31])?);

        Ok(())
    }
}
