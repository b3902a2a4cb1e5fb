//! Pipeline error types

use std::path::PathBuf;

use canscope_core::SourceError;
use thiserror::Error;

/// Trace file errors
#[derive(Debug, Error)]
pub enum TraceError {
    /// I/O failure on a trace file
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Write attempted on a writer that is not open
    #[error("Trace writer is not open")]
    NotOpen,

    /// File extension not recognized as a trace format
    #[error("Unsupported trace format: {0}")]
    UnsupportedFormat(String),

    /// Binary trace header is missing or damaged
    #[error("Corrupt trace file: {0}")]
    Corrupt(String),
}

impl TraceError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TraceError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for trace file operations
pub type TraceResult<T> = Result<T, TraceError>;

/// Pipeline-level errors
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Trace error: {0}")]
    Trace(#[from] TraceError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// A background thread could not be spawned
    #[error("Failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// Row index out of range
    #[error("Invalid row index: {0}")]
    InvalidRow(usize),

    /// Payload longer than a CAN FD frame allows
    #[error("Payload too long: {0} bytes")]
    PayloadTooLong(usize),

    /// Consumer tasks are already running
    #[error("Pipeline already started")]
    AlreadyStarted,
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;
