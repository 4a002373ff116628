//! Gateway error types
//!
//! Covers session-lifecycle and registry failures. Pure codec failures stay
//! in `protocol::ProtocolError`; this type is for everything above the wire
//! that still deserves a matchable error rather than `anyhow::Error`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("session not verified")]
    NotVerified,

    #[error("session for device {0} not found")]
    SessionNotFound(String),

    #[error("request timed out")]
    RequestTimeout,

    #[error("too many observers")]
    TooManyObservers,

    #[error("response decode mismatch: {0}")]
    ResponseMismatch(&'static str),

    #[error("backend call to {target} failed: {reason}")]
    Backend { target: &'static str, reason: String },

    #[error("protocol error: {0}")]
    Protocol(#[from] protocol::ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
