//! Error types for vigil-sg
//!
//! Defines module-specific error types using thiserror for clear error
//! propagation. Nothing in the core pipeline escalates to a process-fatal
//! failure; malformed inputs are dropped and surfaced as warnings.

use thiserror::Error;

/// Main error type for the vigil-sg module
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database connection or query errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// HTTP server errors
    #[error("HTTP server error: {0}")]
    Http(String),

    /// Detection source errors (analysis unavailable or malformed reply)
    #[error("Analysis error: {0}")]
    Analysis(String),

    /// Delay buffer scheduler errors
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// Stream session errors
    #[error("Session error: {0}")]
    Session(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid request
    #[error("Bad request: {0}")]
    InvalidInput(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<vigil_common::Error> for Error {
    fn from(err: vigil_common::Error) -> Self {
        match err {
            vigil_common::Error::Io(e) => Error::Io(e),
            vigil_common::Error::Config(msg) => Error::Config(msg),
            vigil_common::Error::NotFound(msg) => Error::NotFound(msg),
            vigil_common::Error::InvalidInput(msg) => Error::InvalidInput(msg),
            vigil_common::Error::Internal(msg) => Error::Internal(msg),
        }
    }
}

/// Convenience Result type using vigil-sg Error
pub type Result<T> = std::result::Result<T, Error>;
