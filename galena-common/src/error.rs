//! Common error types for Galena

use thiserror::Error;

/// Common result type for Galena operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the triage workspace
#[derive(Error, Debug)]
pub enum Error {
    /// Backup container cannot be processed (fatal to the run)
    #[error("Container error: {0}")]
    Container(#[from] ContainerError),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Fatal container-level failures.
///
/// These are the only errors that abort a triage run. Everything below
/// container level (missing source, malformed row, undecodable image)
/// is demoted to a diagnostic and the run continues.
#[derive(Error, Debug)]
pub enum ContainerError {
    /// Container path missing, unreadable, or I/O failed after retries
    #[error("Container unreadable: {0}")]
    Unreadable(String),

    /// Recognizable container in a form we cannot process (e.g. still encrypted)
    #[error("Container unsupported: {0}")]
    Unsupported(String),

    /// Container recognized but structurally incomplete past the point of use
    #[error("Container truncated: {0}")]
    Truncated(String),
}
