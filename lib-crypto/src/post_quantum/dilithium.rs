//! CRYSTALS-Dilithium5 wrapper functions
//!
//! Detached signatures only: the wire formats place the 4595-byte signature
//! next to the signed material, never wrapped around it.

use anyhow::Result;
use pqcrypto_dilithium::dilithium5;
use pqcrypto_traits::sign::{
    DetachedSignature, PublicKey as SignPublicKey, SecretKey as SignSecretKey,
};

/// Generate a Dilithium5 keypair, returned as `(public, private)` raw bytes.
pub fn dilithium5_keypair() -> (Vec<u8>, Vec<u8>) {
    let (pk, sk) = dilithium5::keypair();
    (pk.as_bytes().to_vec(), sk.as_bytes().to_vec())
}

/// Sign a message with Dilithium5, producing a detached signature.
pub fn dilithium5_sign(message: &[u8], secret_key: &[u8]) -> Result<Vec<u8>> {
    let sk = dilithium5::SecretKey::from_bytes(secret_key)
        .map_err(|_| anyhow::anyhow!("Invalid Dilithium5 secret key"))?;

    let signature = dilithium5::detached_sign(message, &sk);
    Ok(signature.as_bytes().to_vec())
}

/// Verify a detached Dilithium5 signature. Malformed inputs verify as `false`.
pub fn dilithium5_verify(message: &[u8], signature: &[u8], public_key: &[u8]) -> Result<bool> {
    let pk = match dilithium5::PublicKey::from_bytes(public_key) {
        Ok(pk) => pk,
        Err(_) => return Ok(false),
    };
    let sig = match dilithium5::DetachedSignature::from_bytes(signature) {
        Ok(sig) => sig,
        Err(_) => return Ok(false),
    };

    Ok(dilithium5::verify_detached_signature(&sig, message, &pk).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::post_quantum::constants::{
        DILITHIUM5_PUBLIC_KEY_BYTES, DILITHIUM5_SECRET_KEY_BYTES, DILITHIUM5_SIGNATURE_BYTES,
    };

    #[test]
    fn test_key_sizes() {
        let (pk, sk) = dilithium5_keypair();
        assert_eq!(pk.len(), DILITHIUM5_PUBLIC_KEY_BYTES);
        assert_eq!(sk.len(), DILITHIUM5_SECRET_KEY_BYTES);
    }

    #[test]
    fn test_sign_verify_roundtrip() -> Result<()> {
        let (pk, sk) = dilithium5_keypair();
        let message = b"ephemeral key material under signature";

        let signature = dilithium5_sign(message, &sk)?;
        assert_eq!(signature.len(), DILITHIUM5_SIGNATURE_BYTES);
        assert!(dilithium5_verify(message, &signature, &pk)?);
        assert!(!dilithium5_verify(b"tampered", &signature, &pk)?);

        Ok(())
    }

    #[test]
    fn test_wrong_key_rejects() -> Result<()> {
        let (_, sk) = dilithium5_keypair();
        let (other_pk, _) = dilithium5_keypair();

        let signature = dilithium5_sign(b"msg", &sk)?;
        assert!(!dilithium5_verify(b"msg", &signature, &other_pk)?);

        Ok(())
    }
}
