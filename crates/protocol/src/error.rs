//! Protocol error types

use thiserror::Error;

/// Errors raised by the wire codec. These never cross an await point; a
/// `ProtocolError` means the bytes on hand are not a valid frame, not that
/// anything about the session or the connection went wrong.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Header version nibble does not match the revision this build speaks
    #[error("unsupported protocol version {found} (expected {expected})")]
    UnsupportedVersion { found: u8, expected: u8 },

    /// Header type nibble does not map to a known message type
    #[error("unknown message type {0:#x}")]
    UnknownMessageType(u8),

    /// First body octet does not map to a known method
    #[error("unknown method {0:#x}")]
    UnknownMethod(u8),

    /// Declared body length did not match the bytes supplied to the decoder
    #[error("incomplete frame: expected {expected} body bytes, got {actual}")]
    IncompleteFrame { expected: usize, actual: usize },

    /// A length-bounded field (deviceID, secret, body) fell outside its bound
    #[error("field out of bounds: {field} length {actual} not in [{min}, {max}]")]
    FieldOutOfBounds {
        field: &'static str,
        actual: usize,
        min: usize,
        max: usize,
    },

    /// Encoded body would exceed the 16-bit body length field
    #[error("body too large: {size} bytes (max {max})")]
    BodyTooLarge { size: usize, max: usize },

    /// I/O error while reading or writing a frame
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
