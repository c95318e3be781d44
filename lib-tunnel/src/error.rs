//! Error taxonomy for the tunnel
//!
//! Errors split into two kinds: recoverable conditions the client reconnect
//! loop retries (transport loss, timeouts), and non-recoverable protocol or
//! identity failures that must abort it.

/// Errors surfaced by the transport, handshake, and session layers.
#[derive(Debug)]
pub enum TunnelError {
    /// The underlying transport closed.
    TransportClosed {
        /// Carrier-provided reason, when one exists
        reason: Option<String>,
    },

    /// A handshake read timed out.
    HandshakeTimeout,

    /// The peer refused the requested protocol version and listed its own.
    VersionMismatch { supported: Vec<u8> },

    /// The server refused to operate without encryption.
    EncryptionRefused,

    /// The delivered server identity did not match any pin.
    PinMismatch,

    /// A signature failed verification.
    SignatureInvalid,

    /// A frame or record did not parse, or arrived outside its state.
    MalformedFrame(String),

    /// A cryptographic primitive failed.
    Crypto(String),

    /// The session is closed; no further sends can settle.
    SessionClosed,

    /// Invalid endpoint configuration.
    Config(String),

    /// Network I/O error from the carrier.
    Io(std::io::Error),
}

impl TunnelError {
    /// Whether the client reconnect loop may retry after this error.
    ///
    /// `VersionMismatch` is not inherently recoverable; the endpoint decides
    /// whether a legacy fallback attempt is permitted.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::TransportClosed { .. } | Self::HandshakeTimeout | Self::Io(_)
        )
    }

    pub(crate) fn malformed(what: impl Into<String>) -> Self {
        Self::MalformedFrame(what.into())
    }

    pub(crate) fn crypto(err: anyhow::Error) -> Self {
        Self::Crypto(err.to_string())
    }
}

impl std::fmt::Display for TunnelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TransportClosed { reason: Some(r) } => write!(f, "Transport closed: {}", r),
            Self::TransportClosed { reason: None } => write!(f, "Transport closed"),
            Self::HandshakeTimeout => write!(f, "Handshake timed out"),
            Self::VersionMismatch { supported } => {
                write!(f, "Peer supports only protocol versions {:?}", supported)
            }
            Self::EncryptionRefused => write!(f, "Server refused to disable encryption"),
            Self::PinMismatch => write!(f, "Server identity does not match pinned keys"),
            Self::SignatureInvalid => write!(f, "Signature verification failed"),
            Self::MalformedFrame(s) => write!(f, "Malformed frame: {}", s),
            Self::Crypto(s) => write!(f, "Crypto failure: {}", s),
            Self::SessionClosed => write!(f, "Session closed"),
            Self::Config(s) => write!(f, "Invalid configuration: {}", s),
            Self::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for TunnelError {}

impl From<std::io::Error> for TunnelError {
    fn from(err: std::io::Error) -> Self {
        TunnelError::Io(err)
    }
}
