//! Error types for the multiplexer

use thiserror::Error;

/// Multiplexer error
#[derive(Debug, Error)]
pub enum Error {
    /// Channel is not connected
    #[error("Channel not connected: {0}")]
    NotConnected(String),

    /// Another request with the same correlation key is in flight
    #[error("Duplicate correlation key: {0}")]
    DuplicateKey(String),

    /// A field required to build the correlation key is absent
    #[error("Missing key field {field} in message")]
    MissingKeyField {
        /// Field index
        field: u16,
    },

    /// Send error
    #[error("Send error: {0}")]
    Send(String),

    /// Peer went away
    #[error("Channel disconnected: {0}")]
    Disconnected(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Multiplexer is shutting down
    #[error("Multiplexer shut down")]
    Shutdown,
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;
