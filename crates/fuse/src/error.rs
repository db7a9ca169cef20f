//! The kernel-facing error surface.
//!
//! Rich status errors from the storage layer are collapsed here to the
//! small errno set the kernel sees: ENOENT for absence, EINTR for
//! cancellation, EIO for everything else. The collapse is the single place
//! where the richer errors get logged.

use facetfs_metadata::MetadataError;
use thiserror::Error;

/// An errno carried to the kernel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("errno {0}")]
pub struct FsError(pub libc::c_int);

pub const ENOENT: FsError = FsError(libc::ENOENT);
pub const EIO: FsError = FsError(libc::EIO);
pub const EINTR: FsError = FsError(libc::EINTR);
pub const EINVAL: FsError = FsError(libc::EINVAL);
pub const ENOTDIR: FsError = FsError(libc::ENOTDIR);

/// Result type for node and handle operations.
pub type FsResult<T> = std::result::Result<T, FsError>;

impl From<MetadataError> for FsError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::NotFound(_) => ENOENT,
            MetadataError::Cancelled => EINTR,
            other => {
                tracing::error!(error = %other, "storage error collapsed to EIO");
                EIO
            }
        }
    }
}
