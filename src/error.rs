//! Error types for Setu
//!
//! Errors are split by how far they are allowed to travel:
//!
//! | Type | Scope | Bridge reaction |
//! |------|-------|-----------------|
//! | [`DecodeError`] | one message | error record emitted, connection continues |
//! | [`DecryptError`] | one message | logged and discarded, connection continues |
//! | [`TransportError`] (framing) | one connection | connection closed |
//! | [`TransportError`] (other) | one link | reconnect policy |
//! | [`Error`] | process | startup / configuration failures |

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Payload could not be turned into sensor readings
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Payload length does not match the layout
    #[error("Length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch {
        /// Length required by the layout
        expected: usize,
        /// Length received
        actual: usize,
    },

    /// Recomputed CRC differs from the trailing checksum
    #[error("Checksum mismatch: expected {expected:#06x}, got {actual:#06x}")]
    ChecksumMismatch {
        /// Checksum carried by the packet
        expected: u16,
        /// Checksum recomputed over the packet bytes
        actual: u16,
    },

    /// First byte is not a known packet type
    #[error("Unknown packet type: {0:#04x}")]
    UnknownPacketType(u8),

    /// Textual IMU payload had no usable readings
    #[error("Invalid IMU text: {0}")]
    InvalidText(String),

    /// JSON envelope was malformed
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),
}

/// Stream or pub/sub transport failure
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Underlying socket error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Could not establish the connection
    #[error("Connect to {addr} failed: {reason}")]
    ConnectFailed {
        /// Remote address
        addr: String,
        /// Failure description
        reason: String,
    },

    /// TLS handshake did not complete
    #[error("TLS handshake failed: {0}")]
    Handshake(String),

    /// Blocking operation exceeded its deadline
    #[error("Operation timed out")]
    Timeout,

    /// Peer closed the connection at a frame boundary
    #[error("Connection closed by peer")]
    Closed,

    /// Peer closed the connection in the middle of a frame
    #[error("Incomplete frame: expected {expected} bytes, received {received}")]
    IncompleteFrame {
        /// Bytes the frame header announced (or 4 for the header itself)
        expected: usize,
        /// Bytes received before close
        received: usize,
    },

    /// Length prefix exceeds the sanity limit
    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Announced size
        size: usize,
        /// Configured maximum
        max: usize,
    },

    /// Broker rejected or could not queue a publish
    #[error("Publish failed: {0}")]
    Publish(String),

    /// Broker rejected or could not queue a subscribe
    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    /// Link is not connected
    #[error("Not connected")]
    NotConnected,
}

impl TransportError {
    /// Malformed length prefix or short read: fatal for the connection only
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            TransportError::IncompleteFrame { .. } | TransportError::FrameTooLarge { .. }
        )
    }

    /// Read deadline expired with nothing buffered (worker may poll again)
    pub fn is_timeout(&self) -> bool {
        match self {
            TransportError::Timeout => true,
            TransportError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }
}

/// Symmetric payload cipher failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecryptError {
    /// Ciphertext is empty or not a whole number of blocks
    #[error("Invalid ciphertext length: {0} bytes")]
    InvalidLength(usize),

    /// PKCS#7 padding did not validate
    #[error("Bad padding")]
    BadPadding,

    /// Line was not valid base64
    #[error("Invalid base64: {0}")]
    InvalidBase64(String),
}

/// Setu error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration invalid or unreadable
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS setup failed (certificates, keys, verifier)
    #[error("TLS error: {0}")]
    Tls(String),

    /// Payload decode failure
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Transport failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Payload decrypt failure
    #[error(transparent)]
    Decrypt(#[from] DecryptError),

    /// JSON serialization failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<rustls::Error> for Error {
    fn from(e: rustls::Error) -> Self {
        Error::Tls(e.to_string())
    }
}
