//! Data-plane frame construction and the layered cipher
//!
//! A data frame body is `qos || [dupID(4, BE) || ctrl]_qos1 || payload`,
//! sealed under the session's key stack: encryption applies the keys in
//! derivation order (post-quantum innermost), decryption peels from the
//! outside in. An empty stack (encryption disabled) passes bytes through.

use lib_crypto::{aes_decrypt, aes_encrypt};

use crate::constants::{QOS1_CTRL_ACK, QOS_RELIABLE, QOS_UNRELIABLE};
use crate::error::TunnelError;

/// Apply every stack key over `plain`, innermost first.
pub(crate) fn seal(plain: &[u8], keys: &[Vec<u8>], with_digest: bool) -> Result<Vec<u8>, TunnelError> {
    let mut body = plain.to_vec();
    for key in keys {
        body = aes_encrypt(&body, key, with_digest).map_err(TunnelError::crypto)?;
    }
    Ok(body)
}

/// Peel every stack key off `body`, outermost first.
pub(crate) fn open(body: &[u8], keys: &[Vec<u8>], with_digest: bool) -> Result<Vec<u8>, TunnelError> {
    let mut plain = body.to_vec();
    for key in keys.iter().rev() {
        plain = aes_decrypt(&plain, key, with_digest).map_err(TunnelError::crypto)?;
    }
    Ok(plain)
}

/// Fire-and-forget frame body.
pub(crate) fn encode_qos0(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(1 + payload.len());
    frame.push(QOS_UNRELIABLE);
    frame.extend_from_slice(payload);
    frame
}

/// Reliable frame body carrying a payload.
pub(crate) fn encode_qos1(dup_id: u32, ctrl: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(6 + payload.len());
    frame.push(QOS_RELIABLE);
    frame.extend_from_slice(&dup_id.to_be_bytes());
    frame.push(ctrl);
    frame.extend_from_slice(payload);
    frame
}

/// Acknowledgement frame body; no payload follows the control byte.
pub(crate) fn encode_ack(dup_id: u32) -> Vec<u8> {
    encode_qos1(dup_id, QOS1_CTRL_ACK, &[])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::QOS1_CTRL_FIRST;
    use lib_crypto::random_bytes;

    #[test]
    fn test_seal_open_two_layer_stack() -> Result<(), TunnelError> {
        let keys = vec![random_bytes(32), random_bytes(32)];
        let frame = encode_qos1(42, QOS1_CTRL_FIRST, b"payload");

        let sealed = seal(&frame, &keys, true)?;
        assert_ne!(sealed, frame);
        assert_eq!(open(&sealed, &keys, true)?, frame);

        // Peeling with the stack in the wrong order must fail.
        let reversed: Vec<Vec<u8>> = keys.iter().rev().cloned().collect();
        assert!(open(&sealed, &reversed, true).is_err());

        Ok(())
    }

    #[test]
    fn test_empty_stack_is_passthrough() -> Result<(), TunnelError> {
        let frame = encode_qos0(b"plaintext tunnel");
        assert_eq!(seal(&frame, &[], true)?, frame);
        assert_eq!(open(&frame, &[], true)?, frame);
        Ok(())
    }

    #[test]
    fn test_qos1_layout() {
        let frame = encode_qos1(0x0102_0304, QOS1_CTRL_FIRST, &[0xAA]);
        assert_eq!(frame, vec![QOS_RELIABLE, 0x01, 0x02, 0x03, 0x04, QOS1_CTRL_FIRST, 0xAA]);

        let ack = encode_ack(0x0102_0304);
        assert_eq!(ack, vec![QOS_RELIABLE, 0x01, 0x02, 0x03, 0x04, QOS1_CTRL_ACK]);
    }
}
