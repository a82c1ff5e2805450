//! Error types for the transaction core

use thiserror::Error;

/// Result type for transaction core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Transaction core errors
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed participant assembly or settings
    #[error("Configuration error: {0}")]
    Config(String),

    /// Concurrency error (manager mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Manager or worker pool shut down
    #[error("Shut down: {0}")]
    Shutdown(String),
}
