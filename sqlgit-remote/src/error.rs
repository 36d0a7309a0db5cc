//! Errors raised by the remote helper

use sqlgit_core::StorageError;

pub type Result<T> = std::result::Result<T, HelperError>;

#[derive(Debug, thiserror::Error)]
pub enum HelperError {
    /// Malformed or unknown command, or an interleaved batch
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HelperError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        HelperError::Protocol(msg.into())
    }
}
