//! Wire sizes of the hybrid key material
//!
//! These are fixed by the underlying algorithms and are part of the on-wire
//! contract; the handshake parses packets by offset using them.

/// Ed25519 public key size in bytes
pub const ED25519_PUBLIC_KEY_BYTES: usize = 32;

/// Ed25519 private scalar size in bytes
pub const ED25519_SECRET_KEY_BYTES: usize = 32;

/// Ed25519 detached signature size in bytes
pub const ED25519_SIGNATURE_BYTES: usize = 64;

/// X25519 public key size in bytes
pub const X25519_PUBLIC_KEY_BYTES: usize = 32;

/// Dilithium5 public key size in bytes
pub const DILITHIUM5_PUBLIC_KEY_BYTES: usize = 2592;

/// Dilithium5 secret key size in bytes
pub const DILITHIUM5_SECRET_KEY_BYTES: usize = 4864;

/// Dilithium5 detached signature size in bytes
pub const DILITHIUM5_SIGNATURE_BYTES: usize = 4595;

/// Kyber-1024 public key size in bytes
pub const KYBER1024_PUBLIC_KEY_BYTES: usize = 1568;

/// Kyber-1024 secret key size in bytes
pub const KYBER1024_SECRET_KEY_BYTES: usize = 3168;

/// Kyber-1024 ciphertext size in bytes
pub const KYBER1024_CIPHERTEXT_BYTES: usize = 1568;

/// Kyber-1024 shared secret size in bytes
pub const KYBER1024_SHARED_SECRET_BYTES: usize = 32;

/// Combined public key: Ed25519 (32) followed by Dilithium5 (2592)
pub const COMBINED_PUBLIC_KEY_BYTES: usize =
    ED25519_PUBLIC_KEY_BYTES + DILITHIUM5_PUBLIC_KEY_BYTES;

/// Combined private key: Ed25519 scalar (32) followed by Dilithium5 (4864)
pub const COMBINED_SECRET_KEY_BYTES: usize =
    ED25519_SECRET_KEY_BYTES + DILITHIUM5_SECRET_KEY_BYTES;
