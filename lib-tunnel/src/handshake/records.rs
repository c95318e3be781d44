//! Handshake control records
//!
//! MessagePack arrays with fixed positional semantics. Each record is a serde
//! tuple struct whose first element is the record tag; decoding rejects arity
//! mismatches and the caller rejects tag mismatches. Binary key material in
//! the legacy records travels as lowercase contiguous hex strings.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::TunnelError;

/// Record tags, first element of every control array.
pub const TAG_CLIENT_INIT: u8 = 1;
pub const TAG_LEGACY_SERVER_KEYS: u8 = 2;
pub const TAG_LEGACY_KEM_CIPHERTEXT: u8 = 3;
pub const TAG_LEGACY_CHALLENGE: u8 = 4;
pub const TAG_LEGACY_SESSION_PROOF: u8 = 5;
pub const TAG_LEGACY_RESULT: u8 = 6;

/// `[1, handshakeVersion, supportedVersions[], encryptionMode]`
#[derive(Debug, Serialize, Deserialize)]
pub struct ClientInit(pub u8, pub u8, pub Vec<u8>, pub u8);

/// `[2, hex(ephemeralKemPub), hex(compositeSignature), hex(rootPub)]`
#[derive(Debug, Serialize, Deserialize)]
pub struct LegacyServerKeys(pub u8, pub String, pub String, pub String);

/// `[3, hex(kemCiphertext)]`
#[derive(Debug, Serialize, Deserialize)]
pub struct LegacyKemCiphertext(pub u8, pub String);

/// `[4, challengeSeedString]`
#[derive(Debug, Serialize, Deserialize)]
pub struct LegacyChallenge(pub u8, pub String);

/// `[5, hex(sessionPub), hex(compositeSignature)]`
#[derive(Debug, Serialize, Deserialize)]
pub struct LegacySessionProof(pub u8, pub String, pub String);

/// `[6, newSession]`
#[derive(Debug, Serialize, Deserialize)]
pub struct LegacyResult(pub u8, pub bool);

/// Encode a record to MessagePack bytes.
pub fn encode<T: Serialize>(record: &T) -> Result<Vec<u8>, TunnelError> {
    rmp_serde::to_vec(record)
        .map_err(|e| TunnelError::malformed(format!("record encode: {}", e)))
}

/// Decode a record, rejecting wrong arity or element types.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, TunnelError> {
    rmp_serde::from_slice(bytes)
        .map_err(|e| TunnelError::malformed(format!("record decode: {}", e)))
}

/// Decode and additionally require the expected record tag.
pub fn decode_tagged<T>(bytes: &[u8], tag: u8, get_tag: impl Fn(&T) -> u8) -> Result<T, TunnelError>
where
    T: DeserializeOwned,
{
    let record = decode::<T>(bytes)?;
    if get_tag(&record) != tag {
        return Err(TunnelError::malformed(format!(
            "unexpected record tag {} (expected {})",
            get_tag(&record),
            tag
        )));
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_init_roundtrip() -> Result<(), TunnelError> {
        let init = ClientInit(TAG_CLIENT_INIT, 2, vec![2, 1], 0);
        let bytes = encode(&init)?;
        let back: ClientInit = decode_tagged(&bytes, TAG_CLIENT_INIT, |r: &ClientInit| r.0)?;
        assert_eq!(back.1, 2);
        assert_eq!(back.2, vec![2, 1]);
        assert_eq!(back.3, 0);
        Ok(())
    }

    #[test]
    fn test_wrong_tag_rejected() -> Result<(), TunnelError> {
        let bytes = encode(&LegacyResult(TAG_LEGACY_RESULT, true))?;
        assert!(decode_tagged::<LegacyResult>(&bytes, TAG_LEGACY_CHALLENGE, |r| r.0).is_err());
        Ok(())
    }

    #[test]
    fn test_arity_mismatch_rejected() -> Result<(), TunnelError> {
        // A 2-element array does not parse as a 4-element record.
        let bytes = encode(&LegacyKemCiphertext(TAG_LEGACY_KEM_CIPHERTEXT, "aa".into()))?;
        assert!(decode::<ClientInit>(&bytes).is_err());
        Ok(())
    }

    #[test]
    fn test_supported_versions_wrapper() -> Result<(), TunnelError> {
        // The version-mismatch payload is an array wrapping the version list.
        let bytes = encode(&(vec![2u8, 1u8],))?;
        let (list,): (Vec<u8>,) = decode(&bytes)?;
        assert_eq!(list, vec![2, 1]);
        Ok(())
    }
}
