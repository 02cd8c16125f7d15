//! Storage Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.
//!
//! Adapter errors always name the provider and the [`Operation`] that failed
//! so that a failure surfacing from the middle of a fan-out can be traced back
//! to the backend that produced it without unwinding the whole error tree.

use derive_more::{Display, Error};
use std::io::Error as IoError;

/// A storage error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The adapter capability that was being exercised when an error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Operation {
    #[display("upload")]
    Upload,
    #[display("download")]
    Download,
    #[display("list")]
    List,
    #[display("delete")]
    Delete,
    #[display("get metadata")]
    GetMetadata,
    #[display("update metadata")]
    UpdateMetadata,
}

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Object does not exist (`scheme://bucket/key`).
    #[display("object not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// The storage registry has no adapter by that name.
    #[display("unsupported cloud provider: {_0}")]
    UnsupportedProvider(#[error(not(source))] String),
    /// Network or authentication failure talking to a backend.
    #[display("{provider}: transport error during {operation}: {reason}")]
    Transport { provider: String, operation: Operation, reason: String },
    /// The backend understood the request and rejected it.
    #[display("{provider}: backend rejected {operation}: {reason}")]
    Backend { provider: String, operation: Operation, reason: String },
    /// The upload body yielded a different number of bytes than declared.
    #[display("upload body size mismatch: expected {expected} bytes, read {actual}")]
    SizeMismatch { expected: u64, actual: u64 },
    /// Object key cannot be represented by the backend.
    #[display("invalid object key: {_0}")]
    InvalidKey(#[error(not(source))] String),
    /// Underlying I/O error (reading an upload body).
    #[display("I/O error: {_0}")]
    Io(IoError),
    /// Adapters or the registry could not be built from configuration.
    #[display("storage configuration error: {_0}")]
    Config(#[error(not(source))] String),
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Transport { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
