//! Error types for the nodesweep library.

use thiserror::Error;

/// Result type alias for nodesweep operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur outside the discovery/termination core.
///
/// Scan, classification and kill failures never surface here; they degrade to
/// empty results or structured [`KillOutcome`](crate::models::KillOutcome)
/// values instead. This enum covers the configuration layer and engine setup.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
