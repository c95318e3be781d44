//! Client-side handshake state machine
//!
//! Drives one connection attempt: Init -> AwaitServerKeys -> (v1 proof
//! ladder) -> AwaitResult. The pin set is checked before the session
//! signature is ever produced; on any identity failure the attempt aborts
//! with nothing of value sent.

use std::time::Duration;

use tracing::debug;

use lib_crypto::post_quantum::constants::{
    COMBINED_PUBLIC_KEY_BYTES, DILITHIUM5_SIGNATURE_BYTES, ED25519_SIGNATURE_BYTES,
    KYBER1024_PUBLIC_KEY_BYTES, X25519_PUBLIC_KEY_BYTES,
};
use lib_crypto::post_quantum::kyber::kyber1024_encapsulate;
use lib_crypto::{
    aes_decrypt, aes_encrypt, classical::x25519::X25519Exchange, compose_signature,
    pin_set_all_keys, pin_set_allows_any, pin_set_matches_key, pin_set_resolve_by_hash,
    split_signature, KeyPair, PublicKey, ServerKeyPin,
};

use super::records::{
    self, ClientInit, LegacyChallenge, LegacyKemCiphertext, LegacyResult, LegacyServerKeys,
    LegacySessionProof, TAG_CLIENT_INIT, TAG_LEGACY_CHALLENGE, TAG_LEGACY_KEM_CIPHERTEXT,
    TAG_LEGACY_RESULT, TAG_LEGACY_SERVER_KEYS, TAG_LEGACY_SESSION_PROOF,
};
use super::{legacy_challenge, session_id_for, HandshakeV1};
use crate::constants::{
    CHALLENGE_BYTES, CHANNEL_HANDSHAKE, ENC_MODE_FULL_KEY, ENC_MODE_HASH, ENC_MODE_PLAIN,
    HS_CLIENT_FINISH, HS_RESULT, HS_SERVER_HELLO, HS_STATUS_ENCRYPTED, HS_STATUS_PLAIN,
    HS_STATUS_REFUSED, HS_STATUS_VERSION_MISMATCH, PROTOCOL_V1, PROTOCOL_V2,
};
use crate::error::TunnelError;
use crate::transport::Transport;
use crate::utils::bytes::{concat, take_checked};

/// Inputs for one client handshake attempt.
pub struct ClientHandshakeParams<'a> {
    pub pins: &'a [ServerKeyPin],
    pub session_keys: &'a KeyPair,
    /// Version to request on this attempt (a fallback retry requests v1).
    pub request_v1: bool,
    pub v1_policy: HandshakeV1,
    pub disable_encryption: bool,
    pub read_timeout: Duration,
}

/// A completed client handshake.
pub struct ClientOutcome {
    pub session_id: String,
    pub protocol_version: u8,
    /// AES keys innermost first (v2: `[pq, classic]`; v1: `[pq]`; empty when
    /// encryption is disabled).
    pub key_stack: Vec<Vec<u8>>,
    /// Server's verdict: true when no live session matched our session ID.
    pub new_session: bool,
}

/// Run the client side of the handshake on a fresh transport.
pub async fn client_handshake(
    transport: &mut Transport,
    params: &ClientHandshakeParams<'_>,
) -> Result<ClientOutcome, TunnelError> {
    let version = if params.request_v1 { PROTOCOL_V1 } else { PROTOCOL_V2 };
    let supported: Vec<u8> = match params.v1_policy {
        HandshakeV1::Forced => vec![PROTOCOL_V1],
        HandshakeV1::Disabled => vec![PROTOCOL_V2],
        HandshakeV1::Auto => vec![PROTOCOL_V2, PROTOCOL_V1],
    };
    let mode = if params.disable_encryption {
        ENC_MODE_PLAIN
    } else if pin_set_allows_any(params.pins) || pin_set_all_keys(params.pins) {
        // The full pinned key is already on hand (or nothing will be
        // verified); the 32-byte hash delivery suffices.
        ENC_MODE_HASH
    } else {
        // Hash pins need the full key delivered to verify root signatures.
        ENC_MODE_FULL_KEY
    };

    let init = ClientInit(TAG_CLIENT_INIT, version, supported, mode);
    let mut frame = vec![CHANNEL_HANDSHAKE];
    frame.extend(records::encode(&init)?);
    transport.sink.send(frame)?;

    if version == PROTOCOL_V1 {
        legacy_flow(transport, params).await
    } else {
        v2_flow(transport, params, mode).await
    }
}

// ============================================================================
// v2 flow
// ============================================================================

async fn v2_flow(
    transport: &mut Transport,
    params: &ClientHandshakeParams<'_>,
    mode: u8,
) -> Result<ClientOutcome, TunnelError> {
    let reply = transport.next_frame(params.read_timeout).await?;
    if reply.len() < 3 || reply[0] != CHANNEL_HANDSHAKE || reply[1] != HS_SERVER_HELLO {
        return Err(TunnelError::malformed("server hello"));
    }

    let key_stack = match reply[2] {
        HS_STATUS_VERSION_MISMATCH => {
            let (supported,): (Vec<u8>,) = records::decode(&reply[3..])?;
            debug!("server rejected protocol version, supports {:?}", supported);
            return Err(TunnelError::VersionMismatch { supported });
        }
        HS_STATUS_REFUSED => return Err(TunnelError::EncryptionRefused),
        HS_STATUS_PLAIN => {
            if mode != ENC_MODE_PLAIN {
                return Err(TunnelError::malformed("unsolicited plaintext handshake"));
            }
            let challenge = &reply[3..];
            if challenge.len() != CHALLENGE_BYTES {
                return Err(TunnelError::malformed("plaintext challenge length"));
            }

            let (sig_classic, sig_pq) =
                params.session_keys.sign(challenge).map_err(TunnelError::crypto)?;
            let finish = concat(&[
                &[CHANNEL_HANDSHAKE, HS_CLIENT_FINISH],
                &params.session_keys.public_key.to_bytes(),
                &sig_classic,
                &sig_pq,
            ]);
            transport.sink.send(finish)?;
            Vec::new()
        }
        HS_STATUS_ENCRYPTED => {
            let body = &reply[3..];
            let (server_x, rest) = take_checked(body, X25519_PUBLIC_KEY_BYTES, "server X25519 key")?;
            let (kyber_pub, rest) = take_checked(rest, KYBER1024_PUBLIC_KEY_BYTES, "server KEM key")?;
            let (sig_classic, rest) = take_checked(rest, ED25519_SIGNATURE_BYTES, "classical signature")?;
            let (sig_pq, rest) = take_checked(rest, DILITHIUM5_SIGNATURE_BYTES, "post-quantum signature")?;
            let (challenge, pin_material) = take_checked(rest, CHALLENGE_BYTES, "challenge")?;

            // Identity first: resolve the root key through the pin set, then
            // check both signatures over the ephemeral key material.
            if let Some(root) = resolve_root(params.pins, mode, pin_material)? {
                let signed = concat(&[server_x, kyber_pub]);
                if !root
                    .verify(&signed, sig_classic, sig_pq)
                    .map_err(TunnelError::crypto)?
                {
                    return Err(TunnelError::SignatureInvalid);
                }
            }

            // Hybrid key agreement: X25519 against the server ephemeral,
            // Kyber encapsulation to the server KEM key.
            let exchange = X25519Exchange::generate();
            let client_x = exchange.public_bytes();
            let k_classic = exchange.agree(server_x).map_err(TunnelError::crypto)?;
            let (kyber_ct, k_pq) = kyber1024_encapsulate(kyber_pub).map_err(TunnelError::crypto)?;

            // Session proof, wrapped under both derived keys so neither alone
            // can forge or read it.
            let (sig_classic, sig_pq) =
                params.session_keys.sign(challenge).map_err(TunnelError::crypto)?;
            let inner = concat(&[
                &params.session_keys.public_key.to_bytes(),
                &sig_classic,
                &sig_pq,
            ]);
            let sealed = aes_encrypt(&inner, &k_pq, true).map_err(TunnelError::crypto)?;
            let sealed = aes_encrypt(&sealed, &k_classic, true).map_err(TunnelError::crypto)?;

            let finish = concat(&[
                &[CHANNEL_HANDSHAKE, HS_CLIENT_FINISH],
                &client_x,
                &kyber_ct,
                &sealed,
            ]);
            transport.sink.send(finish)?;

            vec![k_pq.to_vec(), k_classic.to_vec()]
        }
        other => {
            return Err(TunnelError::malformed(format!(
                "unknown server hello status {:#04x}",
                other
            )))
        }
    };

    // Await the server verdict.
    let result = transport.next_frame(params.read_timeout).await?;
    if result.len() != 3 || result[0] != CHANNEL_HANDSHAKE || result[1] != HS_RESULT {
        return Err(TunnelError::malformed("handshake result"));
    }

    Ok(ClientOutcome {
        session_id: session_id_for(PROTOCOL_V2, &params.session_keys.public_key),
        protocol_version: PROTOCOL_V2,
        key_stack,
        new_session: result[2] == 1,
    })
}

/// Resolve the server root key from delivered pin material, or `None` when
/// the pin set disables verification.
fn resolve_root(
    pins: &[ServerKeyPin],
    mode: u8,
    pin_material: &[u8],
) -> Result<Option<PublicKey>, TunnelError> {
    if pin_set_allows_any(pins) {
        return Ok(None);
    }

    let key_bytes: Vec<u8> = if mode == ENC_MODE_FULL_KEY {
        if pin_material.len() != COMBINED_PUBLIC_KEY_BYTES {
            return Err(TunnelError::malformed("delivered root key length"));
        }
        if !pin_set_matches_key(pins, pin_material) {
            return Err(TunnelError::PinMismatch);
        }
        pin_material.to_vec()
    } else {
        if pin_material.len() != 32 {
            return Err(TunnelError::malformed("delivered root key hash length"));
        }
        match pin_set_resolve_by_hash(pins, pin_material) {
            Some(pinned) => pinned.to_vec(),
            None => return Err(TunnelError::PinMismatch),
        }
    };

    let root = PublicKey::from_bytes(&key_bytes).map_err(TunnelError::crypto)?;
    Ok(Some(root))
}

// ============================================================================
// v1 flow
// ============================================================================

async fn legacy_flow(
    transport: &mut Transport,
    params: &ClientHandshakeParams<'_>,
) -> Result<ClientOutcome, TunnelError> {
    // Server keys: ephemeral KEM key under a dual root signature.
    let frame = recv_legacy(transport, params.read_timeout).await?;
    let keys: LegacyServerKeys =
        records::decode_tagged(&frame, TAG_LEGACY_SERVER_KEYS, |r: &LegacyServerKeys| r.0)?;

    let eph_kem = decode_hex(&keys.1, "ephemeral KEM key")?;
    if eph_kem.len() != KYBER1024_PUBLIC_KEY_BYTES {
        return Err(TunnelError::malformed("ephemeral KEM key length"));
    }
    let composite = decode_hex(&keys.2, "composite signature")?;
    let root_bytes = decode_hex(&keys.3, "root public key")?;

    // Sentinel check applies even when identity verification is off.
    let (sig_classic, sig_pq) =
        split_signature(&composite).map_err(|_| TunnelError::SignatureInvalid)?;

    if !pin_set_allows_any(params.pins) {
        if !pin_set_matches_key(params.pins, &root_bytes) {
            return Err(TunnelError::PinMismatch);
        }
        let root = PublicKey::from_bytes(&root_bytes).map_err(TunnelError::crypto)?;
        if !root
            .verify(&eph_kem, sig_classic, sig_pq)
            .map_err(TunnelError::crypto)?
        {
            return Err(TunnelError::SignatureInvalid);
        }
    }

    // Encapsulate; from here both sides hold the session key.
    let (kyber_ct, k_pq) = kyber1024_encapsulate(&eph_kem).map_err(TunnelError::crypto)?;
    send_legacy(
        transport,
        &records::encode(&LegacyKemCiphertext(
            TAG_LEGACY_KEM_CIPHERTEXT,
            hex::encode(&kyber_ct),
        ))?,
    )?;

    // Challenge seed arrives encrypted; derive and sign the nested digest.
    let frame = recv_legacy(transport, params.read_timeout).await?;
    let plain = aes_decrypt(&frame, &k_pq, false).map_err(TunnelError::crypto)?;
    let challenge_rec: LegacyChallenge =
        records::decode_tagged(&plain, TAG_LEGACY_CHALLENGE, |r: &LegacyChallenge| r.0)?;

    let challenge = legacy_challenge(&challenge_rec.1);
    let (sig_classic, sig_pq) = params.session_keys.sign(&challenge).map_err(TunnelError::crypto)?;
    let composite = compose_signature(&sig_classic, &sig_pq).map_err(TunnelError::crypto)?;

    let proof = LegacySessionProof(
        TAG_LEGACY_SESSION_PROOF,
        hex::encode(params.session_keys.public_key.to_bytes()),
        hex::encode(&composite),
    );
    let sealed = aes_encrypt(&records::encode(&proof)?, &k_pq, false).map_err(TunnelError::crypto)?;
    send_legacy(transport, &sealed)?;

    // Server verdict, also under the session key.
    let frame = recv_legacy(transport, params.read_timeout).await?;
    let plain = aes_decrypt(&frame, &k_pq, false).map_err(TunnelError::crypto)?;
    let result: LegacyResult =
        records::decode_tagged(&plain, TAG_LEGACY_RESULT, |r: &LegacyResult| r.0)?;

    Ok(ClientOutcome {
        session_id: session_id_for(PROTOCOL_V1, &params.session_keys.public_key),
        protocol_version: PROTOCOL_V1,
        key_stack: vec![k_pq.to_vec()],
        new_session: result.1,
    })
}

async fn recv_legacy(transport: &mut Transport, wait: Duration) -> Result<Vec<u8>, TunnelError> {
    let frame = transport.next_frame(wait).await?;
    if frame.len() < 2 || frame[0] != CHANNEL_HANDSHAKE {
        return Err(TunnelError::malformed("legacy handshake frame"));
    }
    Ok(frame[1..].to_vec())
}

fn send_legacy(transport: &Transport, body: &[u8]) -> Result<(), TunnelError> {
    transport.sink.send(concat(&[&[CHANNEL_HANDSHAKE], body]))
}

fn decode_hex(s: &str, what: &str) -> Result<Vec<u8>, TunnelError> {
    hex::decode(s).map_err(|_| TunnelError::malformed(format!("bad hex in {}", what)))
}
