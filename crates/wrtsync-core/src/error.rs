//! Error types for the wrtsync system
//!
//! Only transport, persistence, registry and configuration problems are
//! errors. Malformed router output is never an error: parsers skip the
//! offending line and move on.

use thiserror::Error;

/// Result type alias for wrtsync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the wrtsync system
#[derive(Error, Debug)]
pub enum Error {
    /// Transport or authentication failure while opening a session
    #[error("Connection error: {0}")]
    Connection(String),

    /// Command issued without an open session, or the channel broke mid-command
    #[error("Execution error: {0}")]
    Execution(String),

    /// State store-related errors
    #[error("State store error: {0}")]
    StateStore(String),

    /// Entity registry errors
    #[error("Entity registry error: {0}")]
    Registry(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create an execution error
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    /// Create a state store error
    pub fn state_store(msg: impl Into<String>) -> Self {
        Self::StateStore(msg.into())
    }

    /// Create an entity registry error
    pub fn registry(msg: impl Into<String>) -> Self {
        Self::Registry(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
