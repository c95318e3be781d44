//! Hashing functions
//!
//! SHA-256 for key fingerprints and embedded plaintext digests, SHA-512 for
//! the legacy handshake challenge construction.

pub mod sha2;

pub use sha2::{sha256, sha512};
