//! ProtoV2d Cryptography Facade
//!
//! Hybrid post-quantum + classical primitives used by the tunnel protocol:
//! CRYSTALS-Dilithium5 and Ed25519 for identity signatures, CRYSTALS-Kyber1024
//! and X25519 for key agreement, AES-256-GCM for the layered session cipher,
//! SHA-256/SHA-512 for digests and challenges.

// Core modules
pub mod classical;
pub mod hashing;
pub mod keypair;
pub mod post_quantum;
pub mod random;
pub mod symmetric;
pub mod types;

// Re-export commonly used types and functions
pub use types::{
    keys::{
        pin_set_all_keys, pin_set_allows_any, pin_set_matches_key, pin_set_resolve_by_hash,
        PrivateKey, PublicKey, ServerKeyPin,
    },
    signatures::{compose_signature, split_signature, SIGNATURE_SENTINEL},
};

// Re-export keypair functionality
pub use keypair::generation::KeyPair;

// Re-export symmetric encryption
pub use symmetric::aes_gcm::{aes_decrypt, aes_encrypt, AES_IV_BYTES};

// Re-export hashing functionality
pub use hashing::{sha256, sha512};

// Re-export random functionality
pub use random::{generate_nonce, random_alphanumeric, random_bytes};
