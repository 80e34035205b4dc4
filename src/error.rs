//! Error types for the peer wire core
//!
//! Every failure the connection core can surface is a variant of
//! [`PeerWireError`]. Setup failures are fatal to the connection attempt and
//! steady-state failures are returned to the caller; nothing here retries.

use std::fmt;

use crate::protocol::MessageId;

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, PeerWireError>;

/// Error type for peer connection and wire codec operations
#[derive(Debug, Clone)]
pub enum PeerWireError {
    /// The TCP connection could not be established or timed out
    DialError {
        message: String,
        address: Option<String>,
        source: Option<String>,
    },

    /// The handshake exchange failed, timed out or was malformed
    HandshakeError {
        message: String,
        peer: Option<String>,
        source: Option<String>,
    },

    /// The bytes on the wire do not follow the protocol
    ProtocolError {
        message: String,
        source: Option<String>,
    },

    /// The first post-handshake message was not the expected type
    UnexpectedMessage {
        peer: String,
        expected: MessageId,
        received: u8,
    },

    /// The stream ended in the middle of a record
    Truncated {
        message: String,
    },

    /// Transport failure on read or write
    IoError {
        message: String,
        source: Option<String>,
    },

    /// Operation attempted on a connection that was already closed
    ConnectionClosed {
        peer: String,
    },

    /// Configuration errors
    ConfigError {
        message: String,
        field: Option<String>,
    },

    /// Argument validation errors
    ValidationError {
        message: String,
        field: Option<String>,
    },
}

impl PeerWireError {
    /// Create a new DialError with address and source
    pub fn dial_error_full(message: impl Into<String>, address: impl Into<String>, source: impl Into<String>) -> Self {
        PeerWireError::DialError {
            message: message.into(),
            address: Some(address.into()),
            source: Some(source.into()),
        }
    }

    /// Create a new HandshakeError with peer and source
    pub fn handshake_error_full(message: impl Into<String>, peer: impl Into<String>, source: impl Into<String>) -> Self {
        PeerWireError::HandshakeError {
            message: message.into(),
            peer: Some(peer.into()),
            source: Some(source.into()),
        }
    }

    /// Create a new ProtocolError with source
    pub fn protocol_error_with_source(message: impl Into<String>, source: impl Into<String>) -> Self {
        PeerWireError::ProtocolError {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a new UnexpectedMessage error
    pub fn unexpected_message(peer: impl Into<String>, expected: MessageId, received: u8) -> Self {
        PeerWireError::UnexpectedMessage {
            peer: peer.into(),
            expected,
            received,
        }
    }

    /// Create a new Truncated error
    pub fn truncated(message: impl Into<String>) -> Self {
        PeerWireError::Truncated {
            message: message.into(),
        }
    }

    /// Create a new IoError with source
    pub fn io_error_with_source(message: impl Into<String>, source: impl Into<String>) -> Self {
        PeerWireError::IoError {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a new ConnectionClosed error
    pub fn connection_closed(peer: impl Into<String>) -> Self {
        PeerWireError::ConnectionClosed { peer: peer.into() }
    }

    /// Create a new ConfigError
    pub fn config_error(message: impl Into<String>) -> Self {
        PeerWireError::ConfigError {
            message: message.into(),
            field: None,
        }
    }

    /// Create a new ConfigError with field
    pub fn config_error_with_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        PeerWireError::ConfigError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a new ValidationError with field
    pub fn validation_error_with_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        PeerWireError::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Add context to the error
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        let ctx = context.into();
        match &mut self {
            PeerWireError::DialError { source, .. }
            | PeerWireError::HandshakeError { source, .. }
            | PeerWireError::ProtocolError { source, .. }
            | PeerWireError::IoError { source, .. } => {
                *source = Some(source.as_ref().map_or_else(|| ctx.clone(), |s| format!("{}: {}", s, ctx)));
            }
            PeerWireError::Truncated { message } => {
                *message = format!("{}: {}", message, ctx);
            }
            _ => {}
        }
        self
    }
}

impl fmt::Display for PeerWireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerWireError::DialError { message, address, source } => {
                match (address, source) {
                    (Some(a), Some(s)) => write!(f, "Dial error: {} (address: {}, source: {})", message, a, s),
                    (Some(a), None) => write!(f, "Dial error: {} (address: {})", message, a),
                    (None, Some(s)) => write!(f, "Dial error: {} (source: {})", message, s),
                    (None, None) => write!(f, "Dial error: {}", message),
                }
            }
            PeerWireError::HandshakeError { message, peer, source } => {
                match (peer, source) {
                    (Some(p), Some(s)) => write!(f, "Handshake error: {} (peer: {}, source: {})", message, p, s),
                    (Some(p), None) => write!(f, "Handshake error: {} (peer: {})", message, p),
                    (None, Some(s)) => write!(f, "Handshake error: {} (source: {})", message, s),
                    (None, None) => write!(f, "Handshake error: {}", message),
                }
            }
            PeerWireError::ProtocolError { message, source } => {
                if let Some(src) = source {
                    write!(f, "Protocol error: {} (source: {})", message, src)
                } else {
                    write!(f, "Protocol error: {}", message)
                }
            }
            PeerWireError::UnexpectedMessage { peer, expected, received } => {
                write!(
                    f,
                    "Unexpected message: expected {:?} (id {}) but got id {} (peer: {})",
                    expected, *expected as u8, received, peer
                )
            }
            PeerWireError::Truncated { message } => write!(f, "Truncated stream: {}", message),
            PeerWireError::IoError { message, source } => {
                if let Some(src) = source {
                    write!(f, "I/O error: {} (source: {})", message, src)
                } else {
                    write!(f, "I/O error: {}", message)
                }
            }
            PeerWireError::ConnectionClosed { peer } => write!(f, "Connection closed (peer: {})", peer),
            PeerWireError::ConfigError { message, field } => {
                if let Some(field_val) = field {
                    write!(f, "Config error: {} (field: {})", message, field_val)
                } else {
                    write!(f, "Config error: {}", message)
                }
            }
            PeerWireError::ValidationError { message, field } => {
                if let Some(field_val) = field {
                    write!(f, "Validation error: {} (field: {})", message, field_val)
                } else {
                    write!(f, "Validation error: {}", message)
                }
            }
        }
    }
}

impl std::error::Error for PeerWireError {}

impl From<std::io::Error> for PeerWireError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => PeerWireError::truncated(err.to_string()),
            kind => PeerWireError::io_error_with_source(err.to_string(), kind.to_string()),
        }
    }
}

impl From<serde_json::Error> for PeerWireError {
    fn from(err: serde_json::Error) -> Self {
        PeerWireError::config_error(format!("Failed to parse JSON config: {}", err))
    }
}

impl From<tokio::time::error::Elapsed> for PeerWireError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        PeerWireError::io_error_with_source("Operation timed out", std::io::ErrorKind::TimedOut.to_string())
    }
}
