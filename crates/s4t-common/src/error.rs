//! Common error types for S4T.

use thiserror::Error;

/// Result type alias using S4T's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for configuration, I/O and sink operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (file, network, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// A reading could not be parsed
    #[error("invalid reading: {0}")]
    InvalidReading(String),

    /// The time-series sink rejected or failed a write
    #[error("sink error: {0}")]
    Sink(String),
}

impl Error {
    /// Create a serialization error from any displayable type.
    pub fn serialization(msg: impl std::fmt::Display) -> Self {
        Self::Serialization(msg.to_string())
    }

    /// Create a config error from any displayable type.
    pub fn config(msg: impl std::fmt::Display) -> Self {
        Self::Config(msg.to_string())
    }

    /// Create an invalid reading error from any displayable type.
    pub fn invalid_reading(msg: impl std::fmt::Display) -> Self {
        Self::InvalidReading(msg.to_string())
    }

    /// Create a sink error from any displayable type.
    pub fn sink(msg: impl std::fmt::Display) -> Self {
        Self::Sink(msg.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
