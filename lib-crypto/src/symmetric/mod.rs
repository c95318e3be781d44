//! Symmetric encryption - the layered session cipher
//!
//! AES-256-GCM with a 16-byte random IV and an optional embedded plaintext
//! digest. The tunnel nests these ciphertexts, one layer per key in the
//! session's key stack.

pub mod aes_gcm;

pub use aes_gcm::{aes_decrypt, aes_encrypt, AES_IV_BYTES, AES_KEY_BYTES};
