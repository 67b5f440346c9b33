//! Error types for idlhub-git

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Malformed path segment or unsupported git command.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("repository not found: {0}")]
    RepositoryNotFound(String),

    /// Subprocess failed to start or exited non-zero.
    #[error("git process error: {0}")]
    Process(String),

    /// Unrecognized service name on the wire.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
