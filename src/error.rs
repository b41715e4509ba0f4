//! Error type for a single conversion job

use thiserror::Error;

/// Why a job (or the final archive) failed
///
/// Every variant is terminal for its unit of work and none is retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConversionError {
    #[error("failed to stage {name}: {reason}")]
    Write { name: String, reason: String },

    #[error("transcode failed: {0}")]
    Exec(String),

    #[error("failed to read {name}: {reason}")]
    Read { name: String, reason: String },

    #[error("failed to deliver {name}: {reason}")]
    Sink { name: String, reason: String },

    #[error("archive failed: {0}")]
    Archive(String),
}
