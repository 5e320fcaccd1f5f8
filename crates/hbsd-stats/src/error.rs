//! Statistics engine error types

use thiserror::Error;

/// Statistics-specific errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StatsError {
    #[error("Statistics buffer full ({capacity} non-final messages)")]
    BufferFull { capacity: usize },

    #[error("Invalid version {version} (max {max})")]
    VersionOutOfRange { version: usize, max: usize },

    #[error("Invalid seen start index {index} (max {max})")]
    StartIndexOutOfRange { index: usize, max: usize },

    #[error("Bitmap length mismatch: expected {expected}, got {actual}")]
    BitmapLength { expected: usize, actual: usize },

    #[error("Malformed statistics digest: {reason}")]
    MalformedDigest { reason: String },

    #[error("Protocol error: {0}")]
    Protocol(#[from] hbsd_protocol::ProtocolError),
}

impl StatsError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        StatsError::MalformedDigest {
            reason: reason.into(),
        }
    }
}

/// Result type for statistics operations
pub type Result<T> = std::result::Result<T, StatsError>;
