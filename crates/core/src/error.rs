//! Error types for the core domain.
//!
//! Everything here is a validation or parse failure; storage and filesystem
//! crates carry their own error enums and map these to InvalidArgument.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid filename: {0:?}")]
    InvalidFilename(String),

    #[error("invalid path: {0:?}")]
    InvalidPath(String),

    #[error("invalid percent-encoding in {0:?}")]
    InvalidEncoding(String),

    #[error("unmatched ']' in {0:?}")]
    UnmatchedBracket(String),

    #[error("malformed function clause ({reason}): {clause:?}")]
    MalformedFunction { clause: String, reason: &'static str },

    #[error("unknown query function {0:?}")]
    UnknownFunction(String),

    #[error("wrong argument count: want {want}, got {got}")]
    WrongArgumentCount { want: usize, got: usize },

    #[error("bad integer argument {0:?}")]
    BadIntegerArgument(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
