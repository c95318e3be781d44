//! Composite hybrid signatures
//!
//! The legacy wire format carries both signature halves in one blob:
//! `ed25519(64) || 0xF3 0x11 || dilithium5(4595)`. The two-byte sentinel is a
//! fixed constant inherited from the original protocol revision; peers must
//! reject any composite where it is absent.

use anyhow::Result;

use crate::post_quantum::constants::{DILITHIUM5_SIGNATURE_BYTES, ED25519_SIGNATURE_BYTES};

/// Fixed separator between the classical and post-quantum halves.
pub const SIGNATURE_SENTINEL: [u8; 2] = [0xF3, 0x11];

/// Total composite length.
pub const COMPOSITE_SIGNATURE_BYTES: usize =
    ED25519_SIGNATURE_BYTES + 2 + DILITHIUM5_SIGNATURE_BYTES;

/// Join the two halves into the composite wire form.
pub fn compose_signature(classic: &[u8], pq: &[u8]) -> Result<Vec<u8>> {
    if classic.len() != ED25519_SIGNATURE_BYTES {
        return Err(anyhow::anyhow!("Invalid classical signature length"));
    }
    if pq.len() != DILITHIUM5_SIGNATURE_BYTES {
        return Err(anyhow::anyhow!("Invalid post-quantum signature length"));
    }

    let mut composite = Vec::with_capacity(COMPOSITE_SIGNATURE_BYTES);
    composite.extend_from_slice(classic);
    composite.extend_from_slice(&SIGNATURE_SENTINEL);
    composite.extend_from_slice(pq);
    Ok(composite)
}

/// Split a composite signature, enforcing the sentinel at bytes 64..66.
pub fn split_signature(composite: &[u8]) -> Result<(&[u8], &[u8])> {
    if composite.len() != COMPOSITE_SIGNATURE_BYTES {
        return Err(anyhow::anyhow!(
            "Invalid composite signature length: {}",
            composite.len()
        ));
    }
    if composite[ED25519_SIGNATURE_BYTES..ED25519_SIGNATURE_BYTES + 2] != SIGNATURE_SENTINEL {
        return Err(anyhow::anyhow!("Composite signature sentinel missing"));
    }

    Ok((
        &composite[..ED25519_SIGNATURE_BYTES],
        &composite[ED25519_SIGNATURE_BYTES + 2..],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_split_roundtrip() -> Result<()> {
        let classic = vec![0xAAu8; ED25519_SIGNATURE_BYTES];
        let pq = vec![0xBBu8; DILITHIUM5_SIGNATURE_BYTES];

        let composite = compose_signature(&classic, &pq)?;
        assert_eq!(composite.len(), COMPOSITE_SIGNATURE_BYTES);
        assert_eq!(&composite[64..66], &SIGNATURE_SENTINEL);

        let (c, p) = split_signature(&composite)?;
        assert_eq!(c, &classic[..]);
        assert_eq!(p, &pq[..]);

        Ok(())
    }

    #[test]
    fn test_sentinel_enforced() -> Result<()> {
        let mut composite = compose_signature(
            &vec![0u8; ED25519_SIGNATURE_BYTES],
            &vec![0u8; DILITHIUM5_SIGNATURE_BYTES],
        )?;
        composite[64] = 0x00;
        assert!(split_signature(&composite).is_err());
        Ok(())
    }

    #[test]
    fn test_length_enforced() {
        assert!(split_signature(&[0u8; 100]).is_err());
        assert!(compose_signature(&[0u8; 63], &[0u8; DILITHIUM5_SIGNATURE_BYTES]).is_err());
    }
}
