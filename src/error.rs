//! Error types for the WebSocket channel and CSAP session layers.
//!
//! Every variant folds into one of five broad categories (see [`ErrorKind`])
//! so callers can decide between tearing a connection down and recovering.

use thiserror::Error;

/// Result type alias for channel and session operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Broad error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The byte stream failed or timed out. Fatal for the connection.
    Transport,
    /// Malformed frame, handshake or record. Fatal for the exchange.
    Protocol,
    /// A buffer was too small or a cap was exceeded. Recoverable by the caller.
    Overflow,
    /// Configuration lookup failed.
    Config,
    /// Credentials were missing or rejected.
    Auth,
}

/// Errors that can occur on a channel or session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Invalid frame structure or header.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Protocol violation detected.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Text could not be decoded as UTF-8.
    #[error("Invalid UTF-8 in text frame")]
    InvalidUtf8,

    /// Text could not be converted between charsets.
    #[error("Transcoding failed: {0}")]
    Transcode(String),

    /// Frame size exceeds configured maximum.
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Actual frame size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Message size exceeds configured maximum.
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Actual message size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Too many fragments in a single message.
    #[error("Too many fragments: {count} (max: {max})")]
    TooManyFragments {
        /// Actual fragment count.
        count: usize,
        /// Maximum allowed fragments.
        max: usize,
    },

    /// HTTP head exceeds configured maximum.
    #[error("Handshake too large: {size} bytes (max: {max})")]
    HandshakeTooLarge {
        /// Bytes read so far.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Payload length does not fit in memory on this platform.
    #[error("Payload too large for platform: {size} bytes")]
    PayloadTooLargeForPlatform {
        /// Declared payload length.
        size: u64,
    },

    /// Connection has been closed, with the peer's status code if any.
    #[error("Connection closed: {0:?}")]
    ConnectionClosed(Option<u16>),

    /// A previous write failed; the channel can no longer be used.
    #[error("Channel broken by an earlier transport failure")]
    ChannelBroken,

    /// Invalid WebSocket handshake.
    #[error("Invalid handshake: {0}")]
    InvalidHandshake(String),

    /// Upgrade requested without an `Upgrade` header.
    #[error("Upgrade requested without an Upgrade header")]
    NoUpgradeProtocol,

    /// Upgrade requested to something other than `websocket`.
    #[error("Unsupported upgrade protocol: {0}")]
    UnsupportedUpgrade(String),

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),

    /// The per-call timeout elapsed.
    #[error("Operation timed out")]
    Timeout,

    /// Reserved opcode used.
    #[error("Reserved opcode: {0:#x}")]
    ReservedOpcode(u8),

    /// Invalid opcode value.
    #[error("Invalid opcode: {0:#x}")]
    InvalidOpcode(u8),

    /// Control frame fragmented (RFC violation).
    #[error("Control frames cannot be fragmented")]
    FragmentedControlFrame,

    /// Control frame payload too large (>125 bytes).
    #[error("Control frame payload too large: {0} bytes (max: 125)")]
    ControlFrameTooLarge(usize),

    /// Unmasked client frame.
    #[error("Client frame must be masked")]
    UnmaskedClientFrame,

    /// Masked server frame.
    #[error("Server frame must not be masked")]
    MaskedServerFrame,

    /// Reserved bits set without extension.
    #[error("Reserved bits set without negotiated extension")]
    ReservedBitsSet,

    /// Incomplete frame data.
    #[error("Incomplete frame: need {needed} more bytes")]
    IncompleteFrame {
        /// Number of additional bytes needed.
        needed: usize,
    },

    /// Caller buffer too small, outbound cap exceeded, or read past the
    /// declared fragment count.
    #[error("Overflow: {size} bytes (max: {max})")]
    Overflow {
        /// Requested or arrived size.
        size: usize,
        /// Available room.
        max: usize,
    },

    /// Invalid size argument.
    #[error("Invalid size: {0}")]
    Size(String),

    /// The user-control frame did not match the declared size.
    #[error("User control block size mismatch: expected {expected}, got {actual}")]
    UserCtl {
        /// Size declared in the control frame.
        expected: usize,
        /// Size of the frame that arrived.
        actual: usize,
    },

    /// CSAP control frame could not be decoded.
    #[error("Invalid control frame: {0}")]
    InvalidControlFrame(String),

    /// Some fragments of a CSAP message were written before a transport failure.
    #[error("Partial send: {sent} of {total} fragments written ({reason})")]
    PartialSend {
        /// Fragments fully written.
        sent: usize,
        /// Fragments declared in the control frame.
        total: usize,
        /// Underlying failure.
        reason: String,
    },

    /// The peer answered the open-handshake with a failure status.
    #[error("Handshake refused: status {status}, reason {reason}")]
    HandshakeRefused {
        /// Three-digit status.
        status: String,
        /// Ten-digit reason.
        reason: String,
    },

    /// Configuration lookup failed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Credentials missing or rejected.
    #[error("Authentication failed: {0}")]
    Auth(String),
}

impl Error {
    /// Category of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_)
            | Error::Timeout
            | Error::ChannelBroken
            | Error::ConnectionClosed(_)
            | Error::PartialSend { .. } => ErrorKind::Transport,
            Error::Overflow { .. } | Error::Size(_) => ErrorKind::Overflow,
            Error::Config(_) => ErrorKind::Config,
            Error::Auth(_) => ErrorKind::Auth,
            _ => ErrorKind::Protocol,
        }
    }

    /// Whether the caller can retry the same operation with different arguments.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        self.kind() == ErrorKind::Overflow
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::Timeout
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::ProtocolViolation(format!("JSON: {err}"))
    }
}
