//! Error types for distortion calibration

use thiserror::Error;

/// Calibration error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// A required calibration or geometry service is unavailable.
    ///
    /// Fatal for a whole processing pass.
    #[error("Configuration missing: {0}")]
    ConfigurationMissing(String),

    /// Operation received nothing to work on
    #[error("Empty input: {0}")]
    EmptyInput(String),

    /// Named object absent from a store
    #[error("Not found: {0}")]
    NotFound(String),

    /// Computation error
    #[error("Computation error: {0}")]
    Computation(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
