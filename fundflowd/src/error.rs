//! Daemon error types.

use fundflow_projector::ProjectionError;
use fundflow_store::StoreError;
use thiserror::Error;

/// Daemon-level errors.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// User projection error
    #[error("Projection error: {0}")]
    Projection(#[from] ProjectionError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP server error
    #[error("Server error: {0}")]
    Server(String),
}

/// Result type for daemon operations.
pub type DaemonResult<T> = Result<T, DaemonError>;
