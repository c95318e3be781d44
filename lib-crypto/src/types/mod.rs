//! Core cryptographic types

pub mod keys;
pub mod signatures;

pub use keys::{
    pin_set_all_keys, pin_set_allows_any, pin_set_matches_key, pin_set_resolve_by_hash,
    PrivateKey, PublicKey, ServerKeyPin,
};
pub use signatures::{compose_signature, split_signature, SIGNATURE_SENTINEL};
