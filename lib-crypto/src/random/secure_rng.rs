//! OS-backed randomness helpers

use rand::{distributions::Alphanumeric, rngs::OsRng, Rng, RngCore};

/// `n` random bytes from the OS RNG.
pub fn random_bytes(n: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; n];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// A fresh 16-byte nonce for keepalive pings.
pub fn generate_nonce() -> [u8; 16] {
    let mut nonce = [0u8; 16];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// A random alphanumeric string of `len` characters. The legacy handshake
/// transmits its challenge seed as a printable string.
pub fn random_alphanumeric(len: usize) -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
