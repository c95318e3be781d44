//! Post-quantum cryptography - CRYSTALS implementations
//!
//! Dilithium5 signatures (NIST Level 5) and Kyber-1024 key encapsulation.
//! These pair with the Ed25519/X25519 classical layer; session security
//! requires breaking both families.

pub mod constants;
pub mod dilithium;
pub mod kyber;

pub use constants::*;
pub use dilithium::{dilithium5_keypair, dilithium5_sign, dilithium5_verify};
pub use kyber::{kyber1024_decapsulate, kyber1024_encapsulate, kyber1024_keypair};
