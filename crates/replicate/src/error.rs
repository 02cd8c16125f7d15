//! Replication Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.
//!
//! A fan-out can fail on several providers at once, so [`ErrorKind::Upload`]
//! carries every per-provider failure instead of a single child error, along
//! with the copies that did land and now have no record pointing at them.

use derive_more::{Display, Error};
use skyvault_storage::FileInfo;
use skyvault_storage::error::{Error as StorageError, ErrorKind as StorageErrorKind};
use std::fmt;

/// A replication error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for replication operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// At least one targeted provider failed; no record was written.
    #[display("{_0}")]
    Upload(#[error(not(source))] UploadFailures),
    /// Every upload succeeded but the metadata record could not be written.
    /// The metadata store error is the child frame; the uploaded copies are
    /// listed here.
    #[display("could not record uploaded file ({} orphaned copies)", _0.len())]
    Persist(#[error(not(source))] Vec<FileInfo>),
    /// The request cannot be attempted as given.
    #[display("invalid upload request: {_0}")]
    InvalidRequest(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    ///
    /// An upload is worth retrying only when every provider failed for a
    /// retryable reason.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Upload(failures) => failures.failures.iter().all(|failure| failure.cause.is_retryable()),
            Self::Persist(_) | Self::InvalidRequest(_) => false,
        }
    }

    /// Copies left in storage without a metadata record.
    pub fn orphaned(&self) -> &[FileInfo] {
        match self {
            Self::Upload(failures) => &failures.orphaned,
            Self::Persist(orphaned) => orphaned,
            Self::InvalidRequest(_) => &[],
        }
    }
}

/// Every failure from one fan-out.
#[derive(Debug)]
pub struct UploadFailures {
    /// One entry per provider that failed, in target order.
    pub failures: Vec<ProviderFailure>,
    /// Copies written by the providers that succeeded.
    ///
    /// With rollback enabled this only lists the copies whose delete failed.
    pub orphaned: Vec<FileInfo>,
}
impl fmt::Display for UploadFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "upload failed on {} provider(s)", self.failures.len())?;
        for (i, failure) in self.failures.iter().enumerate() {
            f.write_str(if i == 0 { ": " } else { "; " })?;
            write!(f, "{failure}")?;
        }
        if !self.orphaned.is_empty() {
            write!(f, " ({} orphaned copies)", self.orphaned.len())?;
        }
        Ok(())
    }
}

/// Why one provider's upload task failed.
#[derive(Debug, Display)]
#[display("{provider}: {cause}")]
pub struct ProviderFailure {
    pub provider: String,
    pub cause: FailureCause,
}

#[derive(Debug)]
pub enum FailureCause {
    /// The adapter (or adapter lookup) returned an error.
    Storage(StorageError),
    /// The upload task panicked or was cancelled.
    Join(String),
}
impl FailureCause {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Storage(err) => err.is_retryable(),
            Self::Join(_) => false,
        }
    }

    /// The storage error kind, if the adapter produced one.
    pub fn storage_kind(&self) -> Option<&StorageErrorKind> {
        match self {
            Self::Storage(err) => Some(&**err),
            Self::Join(_) => None,
        }
    }
}
impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Storage(err) => {
                let kind: &StorageErrorKind = err;
                write!(f, "{kind}")
            },
            Self::Join(reason) => write!(f, "upload task failed: {reason}"),
        }
    }
}
