//! Storage engine error types.

use thiserror::Error;

/// Storage engine operation errors. The variants mirror the
/// surface-independent status kinds consumed by the filesystem layer.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    #[error("unimplemented: {0}")]
    Unimplemented(String),

    #[error("cancelled")]
    Cancelled,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<facetfs_core::Error> for MetadataError {
    fn from(err: facetfs_core::Error) -> Self {
        match err {
            facetfs_core::Error::Internal(msg) => MetadataError::Internal(msg),
            other => MetadataError::InvalidArgument(other.to_string()),
        }
    }
}

impl MetadataError {
    /// Whether this error means the requested row does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, MetadataError::NotFound(_))
    }
}

/// Result type for storage engine operations.
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;
