//! Error types for the query layer.

use inf_storage::StorageError;
use inf_types::InfError;
use thiserror::Error;

/// Errors that can occur while building, evaluating or updating terms
#[derive(Error, Debug)]
pub enum RayError {
    /// Storage operation failed
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Malformed query or functor arguments
    #[error("Syntax error: {0}")]
    Syntax(String),

    /// No functor registered under this name
    #[error("Unknown functor: {0}")]
    UnknownFunctor(String),

    /// Requested value or record absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// A notice handler failed
    #[error("Notice error: {0}")]
    Notice(String),

    /// Stored payload can't be decoded
    #[error("Corrupted payload: {0}")]
    Corrupted(String),
}

impl From<InfError> for RayError {
    fn from(err: InfError) -> Self {
        match err {
            InfError::NotFound(what) => RayError::NotFound(what),
            other => RayError::Syntax(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RayError::Syntax("unexpected ')' at 4".to_string());
        assert_eq!(err.to_string(), "Syntax error: unexpected ')' at 4");

        let err = RayError::UnknownFunctor("foo".to_string());
        assert_eq!(err.to_string(), "Unknown functor: foo");
    }

    #[test]
    fn test_from_storage_error() {
        let err: RayError = StorageError::NotFound("x".to_string()).into();
        assert!(matches!(err, RayError::Storage(_)));
    }

    #[test]
    fn test_bad_attribute_is_syntax() {
        let err: RayError = inf_types::Attribute::new("Bad Name").unwrap_err().into();
        assert!(matches!(err, RayError::Syntax(_)));
    }
}
