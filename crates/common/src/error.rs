//! Common error types shared by the server and client binaries

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("gateway error: {0}")]
    Gateway(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("channel error: {0}")]
    Channel(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("other error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
