//! Cryptographically strong randomness
//!
//! All randomness flows through the operating system RNG.

pub mod secure_rng;

pub use secure_rng::{generate_nonce, random_alphanumeric, random_bytes};
