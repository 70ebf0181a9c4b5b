//! Error types for the wire protocol and input validation.

/// Errors produced while encoding or decoding frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("frame exceeds max length ({len} > {max} bytes without delimiter)")]
    FrameTooLong { len: usize, max: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// User input rejected before any I/O takes place.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid name: {0:?} (letters, digits and spaces only, non-empty)")]
    InvalidName(String),

    #[error("invalid message: {0:?} (letters, digits and spaces only, non-empty)")]
    InvalidMessage(String),

    #[error("invalid address: {0:?}")]
    InvalidAddress(String),

    #[error("invalid port: {0:?} (expected 1-65535)")]
    InvalidPort(String),

    #[error("invalid buffer size: {0:?} (expected an integer >= 1)")]
    InvalidBufferSize(String),
}
