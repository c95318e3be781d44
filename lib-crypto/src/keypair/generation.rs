//! Hybrid keypair generation
//!
//! One `KeyPair` shape serves both roles: the server's long-lived root
//! identity and the client's session signing key. Both are an Ed25519 pair
//! plus a Dilithium5 pair.

use anyhow::Result;

use crate::classical::ed25519::{ed25519_keypair, ed25519_public_from_private};
use crate::post_quantum::dilithium::dilithium5_keypair;
use crate::types::keys::{PrivateKey, PublicKey};

/// Hybrid classical + post-quantum signing keypair.
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub public_key: PublicKey,
    pub private_key: PrivateKey,
}

impl KeyPair {
    /// Generate a fresh hybrid keypair.
    pub fn generate() -> Result<Self> {
        let (classic_pk, classic_sk) = ed25519_keypair();
        let (pq_pk, pq_sk) = dilithium5_keypair();

        let keypair = KeyPair {
            public_key: PublicKey {
                classic: classic_pk,
                pq: pq_pk,
            },
            private_key: PrivateKey {
                classic: classic_sk,
                pq: pq_sk,
            },
        };

        keypair.validate()?;
        Ok(keypair)
    }

    /// Reassemble a keypair from its two serialized halves.
    pub fn from_keys(private_key: PrivateKey, public_key: PublicKey) -> Result<Self> {
        let keypair = KeyPair {
            public_key,
            private_key,
        };
        keypair.validate()?;
        Ok(keypair)
    }

    /// Reassemble from the lowercase hex forms used in configuration.
    pub fn from_hex(private_hex: &str, public_hex: &str) -> Result<Self> {
        Self::from_keys(PrivateKey::from_hex(private_hex)?, PublicKey::from_hex(public_hex)?)
    }

    /// Check that the halves are well formed and actually belong together.
    pub fn validate(&self) -> Result<()> {
        // The classical public key must derive from the private scalar.
        let derived = ed25519_public_from_private(&self.private_key.classic)?;
        if derived != self.public_key.classic {
            return Err(anyhow::anyhow!("Classical key halves do not match"));
        }

        // Prove the post-quantum halves match with a test signature.
        let probe = b"keypair-validation-probe";
        let (_, sig_pq) = self.sign(probe)?;
        if !crate::post_quantum::dilithium::dilithium5_verify(probe, &sig_pq, &self.public_key.pq)? {
            return Err(anyhow::anyhow!("Post-quantum key halves do not match"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::post_quantum::constants::{COMBINED_PUBLIC_KEY_BYTES, COMBINED_SECRET_KEY_BYTES};

    #[test]
    fn test_generate_shapes() -> Result<()> {
        let keypair = KeyPair::generate()?;
        assert_eq!(keypair.public_key.to_bytes().len(), COMBINED_PUBLIC_KEY_BYTES);
        assert_eq!(keypair.private_key.to_bytes().len(), COMBINED_SECRET_KEY_BYTES);
        Ok(())
    }

    #[test]
    fn test_hex_reload() -> Result<()> {
        let keypair = KeyPair::generate()?;
        let reloaded = KeyPair::from_hex(
            &keypair.private_key.to_hex(),
            &keypair.public_key.to_hex(),
        )?;
        assert_eq!(reloaded.public_key, keypair.public_key);
        Ok(())
    }

    #[test]
    fn test_mismatched_halves_rejected() -> Result<()> {
        let a = KeyPair::generate()?;
        let b = KeyPair::generate()?;
        assert!(KeyPair::from_keys(a.private_key, b.public_key).is_err());
        Ok(())
    }
}
