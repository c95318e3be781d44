//! Classical cryptography for the hybrid layer
//!
//! Ed25519 signatures and X25519 key agreement. Each operates alongside its
//! post-quantum counterpart; neither is trusted alone.

pub mod ed25519;
pub mod x25519;

pub use ed25519::{ed25519_keypair, ed25519_keypair_from_seed, ed25519_sign, ed25519_verify};
pub use x25519::X25519Exchange;
