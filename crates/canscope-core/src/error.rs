//! Bus transport errors

use thiserror::Error;

/// Result type for bus operations
pub type SourceResult<T> = Result<T, SourceError>;

/// Errors reported by a [`FrameSource`](crate::FrameSource)
///
/// None of these are fatal to the pipeline; callers turn them into status
/// strings or log lines and carry on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// Opening the bus connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The source is not connected
    #[error("Not connected")]
    NotConnected,

    /// Sending a frame failed
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Receiving failed
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Invalid bus configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Interface type not available in this build
    #[error("Interface not supported: {0}")]
    Unsupported(String),

    /// A frame could not be represented on this bus
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),
}

impl SourceError {
    /// Status string shown for a connection that hit this error
    pub fn status(&self) -> String {
        format!("Error: {}", self)
    }
}
