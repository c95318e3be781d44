//! Protocol constants for lib-tunnel
//!
//! This module defines the on-wire constants and default timings shared
//! across the handshake engine and the session layer.

use std::time::Duration;

// =============================================================================
// Channel Tags
// =============================================================================
//
// Every frame on the carrier starts with a one-byte channel tag selecting the
// subsystem that consumes it.

/// Handshake control frames
pub const CHANNEL_HANDSHAKE: u8 = 0x02;

/// Encrypted data frames
pub const CHANNEL_DATA: u8 = 0x03;

/// Keepalive ping/pong frames
pub const CHANNEL_PING: u8 = 0x04;

/// Graceful close marker (no body)
pub const CHANNEL_CLOSE: u8 = 0x05;

// =============================================================================
// Handshake Packet Types (v2)
// =============================================================================
//
// Version 2 frames carry a packet-type byte after the channel tag. Version 1
// frames carry MessagePack records instead and use no type byte.

/// Server -> client: key material or status
pub const HS_SERVER_HELLO: u8 = 0x02;

/// Client -> server: session proof
pub const HS_CLIENT_FINISH: u8 = 0x03;

/// Server -> client: handshake result (`new_session` flag)
pub const HS_RESULT: u8 = 0x04;

/// Server hello status: encrypted key exchange follows
pub const HS_STATUS_ENCRYPTED: u8 = 0x01;

/// Server hello status: unencrypted challenge follows
pub const HS_STATUS_PLAIN: u8 = 0x02;

/// Server hello status: encryption-disable request refused
pub const HS_STATUS_REFUSED: u8 = 0x03;

/// Server hello status: requested version unsupported; body lists supported
pub const HS_STATUS_VERSION_MISMATCH: u8 = 0x04;

// =============================================================================
// Encryption Modes (client request)
// =============================================================================

/// Encrypted transport, server delivers only the SHA-256 of its root key
pub const ENC_MODE_HASH: u8 = 0;

/// Encrypted transport, server delivers its full root public key
pub const ENC_MODE_FULL_KEY: u8 = 1;

/// Unencrypted transport (requires explicit server opt-in)
pub const ENC_MODE_PLAIN: u8 = 2;

// =============================================================================
// Protocol Versions
// =============================================================================

/// Legacy handshake
pub const PROTOCOL_V1: u8 = 1;

/// Current handshake
pub const PROTOCOL_V2: u8 = 2;

/// Versions this implementation can speak, preferred first
pub const SUPPORTED_VERSIONS: [u8; 2] = [PROTOCOL_V2, PROTOCOL_V1];

// =============================================================================
// Data-Plane Framing
// =============================================================================

/// Fire-and-forget delivery
pub const QOS_UNRELIABLE: u8 = 0x00;

/// Acknowledged at-least-once delivery
pub const QOS_RELIABLE: u8 = 0x01;

/// QoS-1 control byte: first transmission
pub const QOS1_CTRL_FIRST: u8 = 0x00;

/// QoS-1 control byte: retransmission
pub const QOS1_CTRL_RETRY: u8 = 0x01;

/// QoS-1 control byte: acknowledgement (no payload follows)
pub const QOS1_CTRL_ACK: u8 = 0xFF;

/// Ping sub-type: request
pub const PING_REQUEST: u8 = 0x00;

/// Ping sub-type: reply
pub const PING_REPLY: u8 = 0x01;

/// Keepalive nonce size in bytes
pub const PING_NONCE_BYTES: usize = 16;

/// Handshake challenge size in bytes (v2)
pub const CHALLENGE_BYTES: usize = 64;

/// Length of the v1 random challenge string in characters
pub const LEGACY_CHALLENGE_CHARS: usize = 64;

// =============================================================================
// Default Timings
// =============================================================================

/// How long an unacknowledged QoS-1 frame waits before retransmission
pub const QOS1_ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Default interval between keepalive pings
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(15);

/// Default wait for a pong (and for each handshake read)
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default server-side reconnect window after a transport loss
pub const DEFAULT_STREAM_TIMEOUT: Duration = Duration::from_secs(120);

/// Default client wait between reconnection attempts
pub const DEFAULT_RECONNECTION_TIME: Duration = Duration::from_secs(5);

/// Default size of the RTT sample ring buffer
pub const DEFAULT_AVG_PING_COUNT: usize = 10;
