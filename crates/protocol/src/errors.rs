//! Protocol errors module

use thiserror::Error;

/// Error codes carried in `error` bodies.
///
/// The numbering follows the Maelstrom error table so that the network harness
/// can tell definite failures from indefinite ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Timeout = 0,
    NodeNotFound = 1,
    NotSupported = 10,
    TemporarilyUnavailable = 11,
    MalformedRequest = 12,
    Crash = 13,
    Abort = 14,
}

impl ErrorCode {
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// Protocol-level errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Serialization error: {source}")]
    SerializationError { source: serde_json::Error },

    #[error("Malformed request: {reason}")]
    MalformedRequest { reason: String },

    #[error("Unsupported message type: {kind}")]
    NotSupported { kind: String },

    #[error("Node has not received init yet")]
    NotInitialized,

    #[error("Request to {dest} timed out")]
    Timeout { dest: String },

    #[error("Expected {expected} from {dest}, got {actual}")]
    UnexpectedReply {
        dest: String,
        expected: &'static str,
        actual: String,
    },

    #[error("{dest} replied with error {code}: {text}")]
    Remote { dest: String, code: u32, text: String },

    #[error("Transport closed")]
    TransportClosed,
}

impl ProtocolError {
    /// Wire error code reported back to a caller for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            ProtocolError::SerializationError { .. } | ProtocolError::MalformedRequest { .. } => {
                ErrorCode::MalformedRequest
            }
            ProtocolError::NotSupported { .. } => ErrorCode::NotSupported,
            ProtocolError::NotInitialized => ErrorCode::TemporarilyUnavailable,
            ProtocolError::Timeout { .. } => ErrorCode::Timeout,
            ProtocolError::UnexpectedReply { .. } | ProtocolError::Remote { .. } => {
                ErrorCode::Abort
            }
            ProtocolError::TransportClosed => ErrorCode::Crash,
        }
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        ProtocolError::SerializationError { source: err }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = ProtocolError::MalformedRequest {
            reason: "missing field `message`".to_string(),
        };
        assert_eq!(err.code().as_u32(), 12);
        assert_eq!(ProtocolError::NotInitialized.code().as_u32(), 11);
        assert_eq!(
            ProtocolError::Timeout { dest: "n2".to_string() }.code(),
            ErrorCode::Timeout
        );
    }
}
