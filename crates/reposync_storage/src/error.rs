//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A namespace or key is not usable as a storage location.
    #[error("invalid key {key:?}: {reason}")]
    InvalidKey {
        /// The offending namespace or key.
        key: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// The stored data is corrupted.
    #[error("storage corrupted: {0}")]
    Corrupted(String),
}
