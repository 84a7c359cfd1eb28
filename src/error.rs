//! Unified error types for rtmp-outbound

use std::fmt;
use std::io;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for all outbound RTMP operations
#[derive(Debug)]
pub enum Error {
    /// I/O error during network operations
    Io(io::Error),
    /// RTMP protocol violation
    Protocol(ProtocolError),
    /// AMF encoding/decoding error
    Amf(AmfError),
    /// Handshake failure
    Handshake(HandshakeError),
    /// URL scheme other than rtmp
    UnsupportedProtocol(String),
    /// Operation not allowed in the current connection status
    InvalidState(String),
    /// Operation timed out
    Timeout,
    /// Connection was closed
    ConnectionClosed,
    /// Invalid configuration
    Config(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e),
            Error::Amf(e) => write!(f, "AMF error: {}", e),
            Error::Handshake(e) => write!(f, "Handshake error: {}", e),
            Error::UnsupportedProtocol(scheme) => write!(f, "Unsupported protocol: {}", scheme),
            Error::InvalidState(msg) => write!(f, "Invalid connection state: {}", msg),
            Error::Timeout => write!(f, "Operation timed out"),
            Error::ConnectionClosed => write!(f, "Connection closed"),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Amf(e) => Some(e),
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

impl From<AmfError> for Error {
    fn from(err: AmfError) -> Self {
        Error::Amf(err)
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
    MessageTooLarge { size: u32, max: u32 },
    InvalidCommand(String),
    /// Every chunk stream id below the channel limit is in use
    ChunkStreamsExhausted { max: usize },
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::InvalidChunkHeader => write!(f, "Invalid chunk header"),
            ProtocolError::MessageTooLarge { size, max } => {
                write!(f, "Message too large: {} bytes (max {})", size, max)
            }
            ProtocolError::InvalidCommand(cmd) => write!(f, "Invalid command: {}", cmd),
            ProtocolError::ChunkStreamsExhausted { max } => {
                write!(f, "No free chunk stream (limit {})", max)
            }
        }
    }
}

impl std::error::Error for ProtocolError {}

/// AMF encoding/decoding errors
///
/// Cheap to clone so the first build failure can be latched on a
/// connection while also being returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AmfError {
    UnknownMarker(u8),
    UnexpectedEof,
    InvalidUtf8,
    InvalidReference(u16),
    NestingTooDeep,
    InvalidObjectEnd,
    /// Object key longer than the 16-bit length prefix allows
    KeyTooLong(usize),
}

impl fmt::Display for AmfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AmfError::UnknownMarker(m) => write!(f, "Unknown AMF marker: 0x{:02x}", m),
            AmfError::UnexpectedEof => write!(f, "Unexpected end of AMF data"),
            AmfError::InvalidUtf8 => write!(f, "Invalid UTF-8 in AMF string"),
            AmfError::InvalidReference(idx) => write!(f, "Invalid AMF reference: {}", idx),
            AmfError::NestingTooDeep => write!(f, "AMF nesting too deep"),
            AmfError::InvalidObjectEnd => write!(f, "Invalid object end marker"),
            AmfError::KeyTooLong(len) => write!(f, "AMF object key too long: {} bytes", len),
        }
    }
}

impl std::error::Error for AmfError {}

/// Handshake-specific errors
#[derive(Debug)]
pub enum HandshakeError {
    InvalidVersion(u8),
    InvalidState,
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeError::InvalidVersion(v) => write!(f, "Invalid RTMP version: {}", v),
            HandshakeError::InvalidState => write!(f, "Invalid handshake state"),
        }
    }
}

impl std::error::Error for HandshakeError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;
    use std::io;

    #[test]
    fn test_error_display() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "connection reset");
        let err = Error::Io(io_err);
        assert!(err.to_string().contains("I/O error"));

        let err = Error::Protocol(ProtocolError::InvalidChunkHeader);
        assert!(err.to_string().contains("Protocol error"));
        assert!(err.to_string().contains("Invalid chunk header"));

        let err = Error::Amf(AmfError::UnknownMarker(0xFF));
        assert!(err.to_string().contains("AMF error"));
        assert!(err.to_string().contains("0xff"));

        let err = Error::Handshake(HandshakeError::InvalidVersion(5));
        assert!(err.to_string().contains("Handshake error"));
        assert!(err.to_string().contains("5"));

        let err = Error::UnsupportedProtocol("http".into());
        assert!(err.to_string().contains("Unsupported protocol"));
        assert!(err.to_string().contains("http"));

        let err = Error::InvalidState("connect while Connected".into());
        assert!(err.to_string().contains("connect while Connected"));

        assert!(Error::Timeout.to_string().contains("timed out"));
        assert!(Error::ConnectionClosed.to_string().contains("closed"));

        let err = Error::Config("invalid port".into());
        assert!(err.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_error_source() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err = Error::Io(io_err);
        assert!(StdError::source(&err).is_some());

        let err = Error::Amf(AmfError::NestingTooDeep);
        assert!(StdError::source(&err).is_some());

        let err = Error::Protocol(ProtocolError::InvalidChunkHeader);
        assert!(StdError::source(&err).is_none());

        let err = Error::Timeout;
        assert!(StdError::source(&err).is_none());
    }

    #[test]
    fn test_from_conversions() {
        let io_err = io::Error::new(io::ErrorKind::TimedOut, "timeout");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));

        let err: Error = ProtocolError::MessageTooLarge { size: 100, max: 50 }.into();
        assert!(matches!(err, Error::Protocol(_)));

        let err: Error = AmfError::UnexpectedEof.into();
        assert!(matches!(err, Error::Amf(AmfError::UnexpectedEof)));

        let err: Error = HandshakeError::InvalidState.into();
        assert!(matches!(err, Error::Handshake(_)));
    }

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::MessageTooLarge {
            size: 1000,
            max: 500,
        };
        assert!(err.to_string().contains("1000"));
        assert!(err.to_string().contains("500"));

        assert!(ProtocolError::InvalidCommand("bad".into())
            .to_string()
            .contains("bad"));

        assert!(ProtocolError::ChunkStreamsExhausted { max: 16 }
            .to_string()
            .contains("16"));
    }

    #[test]
    fn test_amf_error_display() {
        assert!(AmfError::UnknownMarker(0xAB).to_string().contains("0xab"));
        assert!(AmfError::UnexpectedEof.to_string().contains("end of AMF"));
        assert!(AmfError::InvalidUtf8.to_string().contains("UTF-8"));
        assert!(AmfError::InvalidReference(42).to_string().contains("42"));
        assert!(AmfError::NestingTooDeep.to_string().contains("deep"));
        assert!(AmfError::InvalidObjectEnd.to_string().contains("end"));
        assert!(AmfError::KeyTooLong(70000).to_string().contains("70000"));
    }

    #[test]
    fn test_amf_error_is_cloneable() {
        let err = AmfError::KeyTooLong(1);
        assert_eq!(err.clone(), err);
    }
}
