//! Error types for the switching node

use thiserror::Error;

/// Result type for node operations
pub type Result<T> = std::result::Result<T, Error>;

/// Node errors
#[derive(Error, Debug)]
pub enum Error {
    /// Multiplexer error
    #[error("MUX error: {0}")]
    Mux(#[from] iso_mux::Error),

    /// Transaction core error
    #[error("Transaction error: {0}")]
    Txn(#[from] txn_core::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}
