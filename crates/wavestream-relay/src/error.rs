//! Error types for the relay.

use thiserror::Error;

/// Relay result type alias.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Relay error type.
#[derive(Error, Debug)]
pub enum RelayError {
    /// IO error on a socket or engine pipe.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Control message that is not valid JSON or not a known command.
    #[error("Invalid control message: {0}")]
    InvalidControl(String),

    /// Start configuration that cannot be turned into engine options.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Engine process could not be launched.
    #[error("Engine launch failed: {0}")]
    Launch(String),

    /// The client side of a session went away.
    #[error("Client disconnected")]
    Disconnected,

    /// Serialization error for outbound messages.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
