//! Error types for the WebSocket protocol layer.

use std::io;
use thiserror::Error;

/// Errors that can occur while handling a client connection.
///
/// Frame-level violations (reserved bits, unmasked frames, oversize
/// payloads, unexpected opcodes) never surface as errors: the engine moves
/// to its closed state and the connection is torn down silently.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// I/O error on the client socket.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The HTTP request head could not be parsed.
    #[error("malformed HTTP request: {0}")]
    BadRequest(String),

    /// The HTTP request head exceeded the configured size limit.
    #[error("request head exceeds {max} bytes")]
    RequestTooLarge {
        /// Maximum allowed size.
        max: usize,
    },

    /// The upgrade request was rejected.
    #[error("handshake rejected with status {status}")]
    HandshakeRejected {
        /// HTTP status code sent to the client.
        status: u16,
    },

    /// The peer disconnected before the handshake completed.
    #[error("connection closed during handshake")]
    ConnectionClosed,
}

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProtocolError::BadRequest("missing request line".to_string());
        assert!(err.to_string().contains("missing request line"));

        let err = ProtocolError::HandshakeRejected { status: 403 };
        assert!(err.to_string().contains("403"));

        let err = ProtocolError::RequestTooLarge { max: 8192 };
        assert!(err.to_string().contains("8192"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        let err = ProtocolError::from(io_err);
        assert!(matches!(err, ProtocolError::Io(_)));
    }
}
