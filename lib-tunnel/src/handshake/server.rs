//! Server-side handshake state machine
//!
//! Consumes the client's initial record, serves the requested dialect, and
//! verifies possession of the session signing key. The caller looks the
//! resulting session ID up in its table and completes the exchange with
//! [`send_session_result`], which tells the client whether it got a fresh
//! session or resumed an existing one.

use std::time::Duration;

use tracing::debug;

use lib_crypto::post_quantum::constants::{
    COMBINED_PUBLIC_KEY_BYTES, DILITHIUM5_SIGNATURE_BYTES, ED25519_SIGNATURE_BYTES,
    KYBER1024_CIPHERTEXT_BYTES, X25519_PUBLIC_KEY_BYTES,
};
use lib_crypto::post_quantum::kyber::{kyber1024_decapsulate, kyber1024_keypair};
use lib_crypto::{
    aes_decrypt, aes_encrypt, classical::x25519::X25519Exchange, compose_signature, random_bytes,
    random_alphanumeric, sha256, split_signature, KeyPair, PublicKey,
};

use super::records::{
    self, ClientInit, LegacyChallenge, LegacyKemCiphertext, LegacyResult, LegacyServerKeys,
    LegacySessionProof, TAG_CLIENT_INIT, TAG_LEGACY_CHALLENGE, TAG_LEGACY_KEM_CIPHERTEXT,
    TAG_LEGACY_RESULT, TAG_LEGACY_SERVER_KEYS, TAG_LEGACY_SESSION_PROOF,
};
use super::{legacy_challenge, session_id_for};
use crate::constants::{
    CHALLENGE_BYTES, CHANNEL_HANDSHAKE, ENC_MODE_FULL_KEY, ENC_MODE_HASH, ENC_MODE_PLAIN,
    HS_CLIENT_FINISH, HS_RESULT, HS_SERVER_HELLO, HS_STATUS_ENCRYPTED, HS_STATUS_PLAIN,
    HS_STATUS_REFUSED, HS_STATUS_VERSION_MISMATCH, LEGACY_CHALLENGE_CHARS, PROTOCOL_V1,
    PROTOCOL_V2, SUPPORTED_VERSIONS,
};
use crate::error::TunnelError;
use crate::transport::{Transport, TransportSink};
use crate::utils::bytes::{concat, take_checked};

/// Inputs for one server handshake.
pub struct ServerHandshakeParams<'a> {
    pub root_keys: &'a KeyPair,
    pub allow_disable_encryption: bool,
    pub read_timeout: Duration,
}

/// A verified client, pending the session-table decision.
pub struct ServerOutcome {
    pub session_id: String,
    pub session_public: PublicKey,
    pub protocol_version: u8,
    /// AES keys innermost first; empty when encryption is disabled.
    pub key_stack: Vec<Vec<u8>>,
}

/// Run the server side of the handshake on a freshly attached transport.
pub async fn server_handshake(
    transport: &mut Transport,
    params: &ServerHandshakeParams<'_>,
) -> Result<ServerOutcome, TunnelError> {
    let first = transport.next_frame(params.read_timeout).await?;
    if first.len() < 2 || first[0] != CHANNEL_HANDSHAKE {
        return Err(TunnelError::malformed("initial handshake frame"));
    }

    let init: ClientInit = records::decode_tagged(&first[1..], TAG_CLIENT_INIT, |r: &ClientInit| r.0)?;
    let version = init.1;

    if !SUPPORTED_VERSIONS.contains(&version) {
        let supported = SUPPORTED_VERSIONS.to_vec();
        let reply = concat(&[
            &[CHANNEL_HANDSHAKE, HS_SERVER_HELLO, HS_STATUS_VERSION_MISMATCH],
            &records::encode(&(supported.clone(),))?,
        ]);
        let _ = transport.sink.send(reply);
        debug!("refused handshake version {}", version);
        return Err(TunnelError::VersionMismatch { supported });
    }

    if version == PROTOCOL_V1 {
        return legacy_flow(transport, params).await;
    }

    match init.3 {
        ENC_MODE_PLAIN if !params.allow_disable_encryption => {
            let _ = transport
                .sink
                .send(vec![CHANNEL_HANDSHAKE, HS_SERVER_HELLO, HS_STATUS_REFUSED]);
            Err(TunnelError::EncryptionRefused)
        }
        ENC_MODE_PLAIN => plain_flow(transport, params).await,
        ENC_MODE_HASH | ENC_MODE_FULL_KEY => encrypted_flow(transport, params, init.3).await,
        other => Err(TunnelError::malformed(format!(
            "unknown encryption mode {}",
            other
        ))),
    }
}

/// Complete the handshake by reporting whether the session is new.
pub fn send_session_result(
    sink: &TransportSink,
    outcome: &ServerOutcome,
    new_session: bool,
) -> Result<(), TunnelError> {
    if outcome.protocol_version == PROTOCOL_V1 {
        let record = records::encode(&LegacyResult(TAG_LEGACY_RESULT, new_session))?;
        let sealed =
            aes_encrypt(&record, &outcome.key_stack[0], false).map_err(TunnelError::crypto)?;
        sink.send(concat(&[&[CHANNEL_HANDSHAKE], &sealed]))
    } else {
        sink.send(vec![CHANNEL_HANDSHAKE, HS_RESULT, u8::from(new_session)])
    }
}

// ============================================================================
// v2 flows
// ============================================================================

async fn encrypted_flow(
    transport: &mut Transport,
    params: &ServerHandshakeParams<'_>,
    mode: u8,
) -> Result<ServerOutcome, TunnelError> {
    // Fresh ephemerals, signed by the root identity so the client can verify
    // them against its pins.
    let exchange = X25519Exchange::generate();
    let server_x = exchange.public_bytes();
    let (kyber_pub, kyber_sec) = kyber1024_keypair();

    let signed = concat(&[&server_x, &kyber_pub]);
    let (sig_classic, sig_pq) = params.root_keys.sign(&signed).map_err(TunnelError::crypto)?;
    let challenge = random_bytes(CHALLENGE_BYTES);

    let root_pub = params.root_keys.public_key.to_bytes();
    let pin_material = if mode == ENC_MODE_FULL_KEY {
        root_pub
    } else {
        sha256(&root_pub).to_vec()
    };

    let hello = concat(&[
        &[CHANNEL_HANDSHAKE, HS_SERVER_HELLO, HS_STATUS_ENCRYPTED],
        &server_x,
        &kyber_pub,
        &sig_classic,
        &sig_pq,
        &challenge,
        &pin_material,
    ]);
    transport.sink.send(hello)?;

    // Client finish: their X25519 ephemeral, the KEM ciphertext, and the
    // session proof sealed under both derived keys.
    let finish = recv_finish(transport, params.read_timeout).await?;
    let (client_x, rest) = take_checked(&finish, X25519_PUBLIC_KEY_BYTES, "client X25519 key")?;
    let (kyber_ct, sealed) = take_checked(rest, KYBER1024_CIPHERTEXT_BYTES, "KEM ciphertext")?;

    let k_pq = kyber1024_decapsulate(kyber_ct, &kyber_sec).map_err(TunnelError::crypto)?;
    let k_classic = exchange.agree(client_x).map_err(TunnelError::crypto)?;

    let layer = aes_decrypt(sealed, &k_classic, true).map_err(TunnelError::crypto)?;
    let inner = aes_decrypt(&layer, &k_pq, true).map_err(TunnelError::crypto)?;

    let session_public = verify_session_proof(&inner, &challenge)?;

    Ok(ServerOutcome {
        session_id: session_id_for(PROTOCOL_V2, &session_public),
        session_public,
        protocol_version: PROTOCOL_V2,
        key_stack: vec![k_pq.to_vec(), k_classic.to_vec()],
    })
}

async fn plain_flow(
    transport: &mut Transport,
    params: &ServerHandshakeParams<'_>,
) -> Result<ServerOutcome, TunnelError> {
    let challenge = random_bytes(CHALLENGE_BYTES);
    let hello = concat(&[
        &[CHANNEL_HANDSHAKE, HS_SERVER_HELLO, HS_STATUS_PLAIN],
        &challenge,
    ]);
    transport.sink.send(hello)?;

    let finish = recv_finish(transport, params.read_timeout).await?;
    let session_public = verify_session_proof(&finish, &challenge)?;

    Ok(ServerOutcome {
        session_id: session_id_for(PROTOCOL_V2, &session_public),
        session_public,
        protocol_version: PROTOCOL_V2,
        key_stack: Vec::new(),
    })
}

async fn recv_finish(transport: &mut Transport, wait: Duration) -> Result<Vec<u8>, TunnelError> {
    let frame = transport.next_frame(wait).await?;
    if frame.len() < 3 || frame[0] != CHANNEL_HANDSHAKE || frame[1] != HS_CLIENT_FINISH {
        return Err(TunnelError::malformed("client finish frame"));
    }
    Ok(frame[2..].to_vec())
}

/// Parse `sessionPub || sigClassic || sigPQ` and check both signatures over
/// the challenge. Possession of the session key is the client's identity.
fn verify_session_proof(material: &[u8], challenge: &[u8]) -> Result<PublicKey, TunnelError> {
    let expected =
        COMBINED_PUBLIC_KEY_BYTES + ED25519_SIGNATURE_BYTES + DILITHIUM5_SIGNATURE_BYTES;
    if material.len() != expected {
        return Err(TunnelError::malformed("session proof length"));
    }

    let (pub_bytes, rest) = take_checked(material, COMBINED_PUBLIC_KEY_BYTES, "session key")?;
    let (sig_classic, sig_pq) = take_checked(rest, ED25519_SIGNATURE_BYTES, "session signature")?;

    let session_public = PublicKey::from_bytes(pub_bytes).map_err(TunnelError::crypto)?;
    if !session_public
        .verify(challenge, sig_classic, sig_pq)
        .map_err(TunnelError::crypto)?
    {
        return Err(TunnelError::SignatureInvalid);
    }

    Ok(session_public)
}

// ============================================================================
// v1 flow
// ============================================================================

async fn legacy_flow(
    transport: &mut Transport,
    params: &ServerHandshakeParams<'_>,
) -> Result<ServerOutcome, TunnelError> {
    // Ephemeral KEM key under the dual root signature, composite form.
    let (kyber_pub, kyber_sec) = kyber1024_keypair();
    let (sig_classic, sig_pq) = params.root_keys.sign(&kyber_pub).map_err(TunnelError::crypto)?;
    let composite = compose_signature(&sig_classic, &sig_pq).map_err(TunnelError::crypto)?;

    let keys = LegacyServerKeys(
        TAG_LEGACY_SERVER_KEYS,
        hex::encode(&kyber_pub),
        hex::encode(&composite),
        hex::encode(params.root_keys.public_key.to_bytes()),
    );
    transport
        .sink
        .send(concat(&[&[CHANNEL_HANDSHAKE], &records::encode(&keys)?]))?;

    // KEM ciphertext; decapsulation yields the session key.
    let frame = recv_legacy(transport, params.read_timeout).await?;
    let ct_rec: LegacyKemCiphertext =
        records::decode_tagged(&frame, TAG_LEGACY_KEM_CIPHERTEXT, |r: &LegacyKemCiphertext| r.0)?;
    let kyber_ct = hex::decode(&ct_rec.1)
        .map_err(|_| TunnelError::malformed("bad hex in KEM ciphertext"))?;
    let k_pq = kyber1024_decapsulate(&kyber_ct, &kyber_sec).map_err(TunnelError::crypto)?;

    // Challenge seed, encrypted from here on.
    let seed = random_alphanumeric(LEGACY_CHALLENGE_CHARS);
    let challenge_rec = records::encode(&LegacyChallenge(TAG_LEGACY_CHALLENGE, seed.clone()))?;
    let sealed = aes_encrypt(&challenge_rec, &k_pq, false).map_err(TunnelError::crypto)?;
    transport
        .sink
        .send(concat(&[&[CHANNEL_HANDSHAKE], &sealed]))?;

    // Session proof over the nested challenge digest.
    let frame = recv_legacy(transport, params.read_timeout).await?;
    let plain = aes_decrypt(&frame, &k_pq, false).map_err(TunnelError::crypto)?;
    let proof: LegacySessionProof =
        records::decode_tagged(&plain, TAG_LEGACY_SESSION_PROOF, |r: &LegacySessionProof| r.0)?;

    let pub_bytes = hex::decode(&proof.1)
        .map_err(|_| TunnelError::malformed("bad hex in session key"))?;
    let composite = hex::decode(&proof.2)
        .map_err(|_| TunnelError::malformed("bad hex in session signature"))?;

    let session_public = PublicKey::from_bytes(&pub_bytes).map_err(TunnelError::crypto)?;
    let (sig_classic, sig_pq) =
        split_signature(&composite).map_err(|_| TunnelError::SignatureInvalid)?;

    let challenge = legacy_challenge(&seed);
    if !session_public
        .verify(&challenge, sig_classic, sig_pq)
        .map_err(TunnelError::crypto)?
    {
        return Err(TunnelError::SignatureInvalid);
    }

    Ok(ServerOutcome {
        session_id: session_id_for(PROTOCOL_V1, &session_public),
        session_public,
        protocol_version: PROTOCOL_V1,
        key_stack: vec![k_pq.to_vec()],
    })
}

async fn recv_legacy(transport: &mut Transport, wait: Duration) -> Result<Vec<u8>, TunnelError> {
    let frame = transport.next_frame(wait).await?;
    if frame.len() < 2 || frame[0] != CHANNEL_HANDSHAKE {
        return Err(TunnelError::malformed("legacy handshake frame"));
    }
    Ok(frame[1..].to_vec())
}
