//! Error types for the wave engine.

use std::panic::Location;
use thiserror::Error;

/// Engine result type alias.
pub type Result<T> = std::result::Result<T, WaveError>;

/// Engine error type.
#[derive(Error, Debug)]
pub enum WaveError {
    /// Unknown option name or a value that does not parse as its type.
    #[error("Invalid option: {0}")]
    InvalidOption(String),

    /// Requested compute backend is not compiled in or not present.
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Device allocation, kernel launch or transfer failure.
    #[error("Device error in {operation} at {location}: {message}")]
    Device {
        /// Operation that failed (e.g. "allocate field buffer").
        operation: &'static str,
        /// Source location that issued the operation.
        location: &'static Location<'static>,
        /// Driver or runtime diagnostic.
        message: String,
    },

    /// Emission attempted from the wrong emitter state.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// IO error on the text or binary channel.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WaveError {
    /// Build a device error tagged with the caller's source location.
    #[track_caller]
    pub fn device(operation: &'static str, message: impl Into<String>) -> Self {
        WaveError::Device {
            operation,
            location: Location::caller(),
            message: message.into(),
        }
    }

    /// Whether the error is the consumer closing the binary or text channel.
    pub fn is_broken_pipe(&self) -> bool {
        matches!(self, WaveError::Io(e) if e.kind() == std::io::ErrorKind::BrokenPipe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_error_carries_location() {
        let err = WaveError::device("launch stencil kernel", "out of resources");
        let text = err.to_string();
        assert!(text.contains("launch stencil kernel"));
        assert!(text.contains("error.rs"));
        assert!(text.contains("out of resources"));
    }

    #[test]
    fn test_broken_pipe_detection() {
        let err = WaveError::from(std::io::Error::from(std::io::ErrorKind::BrokenPipe));
        assert!(err.is_broken_pipe());
        assert!(!WaveError::InvalidOption("x".into()).is_broken_pipe());
    }
}
