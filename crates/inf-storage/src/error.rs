//! Storage layer error types.

use thiserror::Error;

/// Errors that can occur in the storage layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// Filesystem operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Value, attribute or file not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Directory lock is held by someone else
    #[error("Lock busy: {0}")]
    LockBusy(String),

    /// Directory lock was lost (reclaimed after expiry)
    #[error("Lock expired: {0}")]
    LockExpired(String),

    /// On-disk structure is inconsistent
    #[error("Corrupted: {0}")]
    Corrupted(String),

    /// Value or payload exceeds the on-disk length prefix
    #[error("Value too long: {0} bytes")]
    ValueTooLong(usize),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl StorageError {
    /// True for the recoverable "absent" condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}
