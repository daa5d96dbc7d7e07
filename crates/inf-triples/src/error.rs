//! Triples store error types.

use thiserror::Error;

/// Errors that can occur in the triples store
#[derive(Error, Debug)]
pub enum TriplesError {
    /// RocksDB operation failed
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    /// No value for this record in this relation
    #[error("Triple not found: {0}")]
    NotFound(String),

    /// Encoded value exceeds the fixed value width
    #[error("Value too long: {0} bytes, at most 255 allowed")]
    ValueTooLong(usize),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The result set was reaped after its grace period
    #[error("Result set expired")]
    CursorExpired,

    /// The store was closed
    #[error("Triples store is closed")]
    Closed,
}

impl From<serde_json::Error> for TriplesError {
    fn from(err: serde_json::Error) -> Self {
        TriplesError::Serialization(err.to_string())
    }
}
