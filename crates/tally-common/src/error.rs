//! Error types shared across Tally crates

use thiserror::Error;

/// Result type alias for shared Tally operations
pub type Result<T> = std::result::Result<T, TallyError>;

/// Errors raised by the shared data model and helpers
#[derive(Error, Debug)]
pub enum TallyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },
}
