//! Unified error types for rtmp-chunk

use std::fmt;
use std::io;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for all chunk stream operations
#[derive(Debug)]
pub enum Error {
    /// Not enough buffered input or output space; call again once more bytes exist.
    /// No state was changed.
    Incomplete,
    /// Chunk stream protocol violation
    Protocol(ProtocolError),
    /// Handshake failure
    Handshake(HandshakeError),
    /// A buffer or pool could not be grown
    Resource(String),
    /// The chunk handler returned `Flow::Error`
    Rejected(String),
    /// The chunk handler returned `Flow::Abort`
    Aborted,
    /// The connection was closed or has already failed
    ConnectionClosed,
    /// The transport gave up waiting
    Timeout,
    /// Invalid configuration
    Config(String),
    /// I/O error in the transport adapter
    Io(io::Error),
}

/// Coarse classification used by the log side channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Insufficient bytes; nothing changed
    Retryable,
    /// Malformed header, handshake or id, or cache exhaustion
    ProtocolInvalid,
    /// Allocation or pool limits
    Resource,
    /// Logged, the connection continues
    Warning,
    /// Signaled by a handler
    User,
    /// Not an error
    Info,
}

impl Error {
    /// True only for [`Error::Incomplete`].
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Incomplete)
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Incomplete => ErrorKind::Retryable,
            Error::Protocol(_) | Error::Handshake(_) => ErrorKind::ProtocolInvalid,
            Error::Resource(_) | Error::Io(_) | Error::Timeout => ErrorKind::Resource,
            Error::Rejected(_) | Error::Aborted => ErrorKind::User,
            Error::ConnectionClosed | Error::Config(_) => ErrorKind::ProtocolInvalid,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Incomplete => write!(f, "Incomplete: more bytes required"),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e),
            Error::Handshake(e) => write!(f, "Handshake error: {}", e),
            Error::Resource(msg) => write!(f, "Resource error: {}", msg),
            Error::Rejected(msg) => write!(f, "Rejected by handler: {}", msg),
            Error::Aborted => write!(f, "Aborted by handler"),
            Error::ConnectionClosed => write!(f, "Connection closed"),
            Error::Timeout => write!(f, "Operation timed out"),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

impl From<HandshakeError> for Error {
    fn from(err: HandshakeError) -> Self {
        Error::Handshake(err)
    }
}

/// Protocol-level errors
#[derive(Debug)]
pub enum ProtocolError {
    InvalidChunkHeader,
    InvalidChunkStreamId(u32),
    /// A compressed header (fmt 1-3) on a chunk stream never opened with fmt 0
    UnknownChunkStream(u32),
    MessageTooLarge { size: u32, max: u32 },
    /// More concurrently active chunk streams than the cache can track
    CacheExhausted { max: usize },
    ControlTooLarge { size: u32, max: usize },
    InvalidControlMessage(u8),
    UnexpectedMessage(String),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::InvalidChunkHeader => write!(f, "Invalid chunk header"),
            ProtocolError::InvalidChunkStreamId(id) => write!(f, "Invalid chunk stream ID: {}", id),
            ProtocolError::UnknownChunkStream(id) => {
                write!(f, "Compressed header on unknown chunk stream: {}", id)
            }
            ProtocolError::MessageTooLarge { size, max } => {
                write!(f, "Message too large: {} bytes (max {})", size, max)
            }
            ProtocolError::CacheExhausted { max } => {
                write!(f, "Inadequate chunk cache: more than {} dynamic chunk streams", max)
            }
            ProtocolError::ControlTooLarge { size, max } => {
                write!(f, "Control message too large: {} bytes (max {})", size, max)
            }
            ProtocolError::InvalidControlMessage(t) => {
                write!(f, "Invalid control message of type {}", t)
            }
            ProtocolError::UnexpectedMessage(msg) => write!(f, "Unexpected message: {}", msg),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Handshake-specific errors
#[derive(Debug)]
pub enum HandshakeError {
    InvalidVersion(u8),
    /// The echoed timestamp differs from the one we sent
    TimestampMismatch { expected: u32, actual: u32 },
    /// The echoed nonce differs from the one we sent
    NonceMismatch,
    InvalidState,
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeError::InvalidVersion(v) => write!(f, "Invalid RTMP version: {}", v),
            HandshakeError::TimestampMismatch { expected, actual } => write!(
                f,
                "Invalid data: echoed timestamp {} does not match {}",
                actual, expected
            ),
            HandshakeError::NonceMismatch => write!(f, "Invalid data: echoed nonce mismatch"),
            HandshakeError::InvalidState => write!(f, "Invalid handshake state"),
        }
    }
}

impl std::error::Error for HandshakeError {}
