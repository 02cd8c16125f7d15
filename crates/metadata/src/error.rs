//! Metadata Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use crate::models::FileId;
use derive_more::{Display, Error};

/// A metadata store error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for metadata store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// How a record was addressed.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum Lookup {
    #[display("id {_0}")]
    Id(FileId),
    #[display("path {_0}")]
    Path(String),
}

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("file metadata not found: {_0}")]
    NotFound(#[error(not(source))] Lookup),
    /// Another live record already holds this id or logical path.
    #[display("file metadata already exists: {_0}")]
    AlreadyExists(#[error(not(source))] Lookup),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
