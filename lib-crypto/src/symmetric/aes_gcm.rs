//! AES-256-GCM encryption helpers
//!
//! Output layout: `iv(16) || sha256(plaintext)(32, optional) || ciphertext+tag`.
//! The GCM tag is 128 bits. When the digest is present, decryption verifies
//! it against the decrypted plaintext and fails closed on mismatch.

use aes_gcm::{
    aead::{consts::U16, Aead, KeyInit},
    aes::Aes256,
    AesGcm, Nonce,
};
use anyhow::Result;

use crate::hashing::sha256;
use crate::random::random_bytes;

/// AES-GCM parameterized with the protocol's 16-byte IV.
type TunnelAesGcm = AesGcm<Aes256, U16>;

/// IV size in bytes, fixed by the wire format.
pub const AES_IV_BYTES: usize = 16;

/// Key size in bytes (AES-256).
pub const AES_KEY_BYTES: usize = 32;

/// Embedded plaintext digest size in bytes.
const DIGEST_BYTES: usize = 32;

/// Encrypt `plain` under `key`, prepending a fresh random IV and, when
/// `with_digest` is set, a SHA-256 of the plaintext between IV and
/// ciphertext.
pub fn aes_encrypt(plain: &[u8], key: &[u8], with_digest: bool) -> Result<Vec<u8>> {
    if key.len() != AES_KEY_BYTES {
        return Err(anyhow::anyhow!("Key must be 32 bytes"));
    }

    let cipher = TunnelAesGcm::new_from_slice(key)
        .map_err(|_| anyhow::anyhow!("Cipher initialization failed"))?;

    let iv = random_bytes(AES_IV_BYTES);
    let nonce = Nonce::<U16>::from_slice(&iv);

    let ciphertext = cipher
        .encrypt(nonce, plain)
        .map_err(|e| anyhow::anyhow!("Encryption failed: {}", e))?;

    let mut result = Vec::with_capacity(
        AES_IV_BYTES + if with_digest { DIGEST_BYTES } else { 0 } + ciphertext.len(),
    );
    result.extend_from_slice(&iv);
    if with_digest {
        result.extend_from_slice(&sha256(plain));
    }
    result.extend_from_slice(&ciphertext);

    Ok(result)
}

/// Decrypt data produced by [`aes_encrypt`] with the same digest mode.
pub fn aes_decrypt(encrypted_data: &[u8], key: &[u8], with_digest: bool) -> Result<Vec<u8>> {
    if key.len() != AES_KEY_BYTES {
        return Err(anyhow::anyhow!("Key must be 32 bytes"));
    }

    let header = AES_IV_BYTES + if with_digest { DIGEST_BYTES } else { 0 };
    // Tag alone is 16 bytes; anything shorter cannot carry a message.
    if encrypted_data.len() < header + 16 {
        return Err(anyhow::anyhow!("Encrypted data too short"));
    }

    let cipher = TunnelAesGcm::new_from_slice(key)
        .map_err(|_| anyhow::anyhow!("Cipher initialization failed"))?;

    let nonce = Nonce::<U16>::from_slice(&encrypted_data[..AES_IV_BYTES]);
    let ciphertext = &encrypted_data[header..];

    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| anyhow::anyhow!("Decryption failed"))?;

    if with_digest {
        let expected = &encrypted_data[AES_IV_BYTES..header];
        if sha256(&plaintext) != expected[..] {
            return Err(anyhow::anyhow!("Plaintext digest mismatch"));
        }
    }

    Ok(plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_without_digest() -> Result<()> {
        let key = random_bytes(32);
        let plain = b"tunnel frame payload";

        let encrypted = aes_encrypt(plain, &key, false)?;
        assert_eq!(aes_decrypt(&encrypted, &key, false)?, plain);
        assert_ne!(&encrypted[AES_IV_BYTES..], plain.as_slice());

        Ok(())
    }

    #[test]
    fn test_roundtrip_with_digest() -> Result<()> {
        let key = random_bytes(32);
        let plain = b"payload with integrity digest";

        let encrypted = aes_encrypt(plain, &key, true)?;
        assert_eq!(encrypted.len(), AES_IV_BYTES + 32 + plain.len() + 16);
        assert_eq!(aes_decrypt(&encrypted, &key, true)?, plain);

        Ok(())
    }

    #[test]
    fn test_any_flipped_byte_fails() -> Result<()> {
        let key = random_bytes(32);
        let encrypted = aes_encrypt(b"sensitive", &key, true)?;

        for i in 0..encrypted.len() {
            let mut corrupted = encrypted.clone();
            corrupted[i] ^= 0x01;
            assert!(
                aes_decrypt(&corrupted, &key, true).is_err(),
                "flip at byte {} was accepted",
                i
            );
        }

        Ok(())
    }

    #[test]
    fn test_wrong_key_fails() -> Result<()> {
        let encrypted = aes_encrypt(b"data", &random_bytes(32), false)?;
        assert!(aes_decrypt(&encrypted, &random_bytes(32), false).is_err());
        Ok(())
    }

    #[test]
    fn test_digest_mode_mismatch_fails() -> Result<()> {
        let key = random_bytes(32);
        let encrypted = aes_encrypt(b"data", &key, false)?;
        // Reading a digest that was never written must not succeed.
        assert!(aes_decrypt(&encrypted, &key, true).is_err());
        Ok(())
    }
}
