//! Storage adapter trait and implementations.
//!
//! This module defines the [`StorageAdapter`] trait, which provides a unified
//! interface over the object stores of different cloud providers (AWS S3,
//! Google Cloud Storage, ...). Every provider is addressed the same way:
//! bucket + key, byte-stream bodies and string-keyed metadata.

#[cfg(feature = "gcs")]
mod gcs;
#[cfg(any(test, feature = "mock"))]
mod mock;
#[cfg(feature = "s3")]
mod s3;

#[cfg(feature = "gcs")]
pub use self::gcs::GcsAdapter;
#[cfg(any(test, feature = "mock"))]
pub use self::mock::{MockAdapter, MockFailure};
#[cfg(feature = "s3")]
pub use self::s3::S3Adapter;
use crate::error::{ErrorKind, Result};
use crate::models::FileInfo;
use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use std::collections::HashMap;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncReadExt};

pub type FileInfoStream<'a> = Pin<Box<dyn Stream<Item = Result<FileInfo>> + Send + 'a>>;
pub type BoxAsyncRead = Pin<Box<dyn AsyncRead + Send + 'static>>;

/// Unified interface for cloud object storage.
///
/// All operations are asynchronous; the only suspension points in an upload
/// fan-out are the network calls made here. Implementations are shared
/// between concurrent tasks as an [`AdapterHandle`](crate::AdapterHandle), so
/// every method takes `&self`.
///
/// # Examples
///
/// ```
/// use std::collections::HashMap;
/// use std::io::Cursor;
/// use skyvault_storage::{FileInfo, StorageAdapter, error::Result};
///
/// async fn put_greeting(adapter: &dyn StorageAdapter, bucket: &str) -> Result<FileInfo> {
///     let body = b"hello, world".to_vec();
///     let size = body.len() as u64;
///     let metadata = HashMap::from([("Content-Type".to_string(), "text/plain".to_string())]);
///     adapter.upload(bucket, "greetings/hello.txt", Box::pin(Cursor::new(body)), size, &metadata).await
/// }
/// ```
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Name of the provider in the storage registry (`"aws"`, `"gcp"`, ...).
    /// Recorded as [`FileInfo::provider`] on every object the adapter returns.
    fn provider(&self) -> &str;

    /// Stream exactly `size` bytes from `body` to `bucket/key`.
    ///
    /// The [`CONTENT_TYPE_KEY`](crate::CONTENT_TYPE_KEY) entry of `metadata`
    /// becomes the object's content type, the rest is attached as custom
    /// metadata using the provider's own encoding.
    ///
    /// # Errors
    /// - [`Transport`](ErrorKind::Transport) on network or auth failure,
    /// - [`Backend`](ErrorKind::Backend) when the provider rejects the request,
    /// - [`SizeMismatch`](ErrorKind::SizeMismatch) when `body` is shorter
    ///   than `size`.
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        body: BoxAsyncRead,
        size: u64,
        metadata: &HashMap<String, String>,
    ) -> Result<FileInfo>;

    /// Open an object for reading, positioned at offset 0.
    ///
    /// Returns [`NotFound`](ErrorKind::NotFound) if the key does not exist.
    async fn download(&self, bucket: &str, key: &str) -> Result<BoxAsyncRead>;

    /// List every object whose key starts with `prefix`.
    ///
    /// Default implementation of this method is to collect all the results
    /// from [`list_stream()`](Self::list_stream) into a [`Vec`] before
    /// returning; the first failed item fails the whole listing.
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<FileInfo>> {
        self.list_stream(bucket, prefix).try_collect().await
    }

    /// Stream every object whose key starts with `prefix`.
    ///
    /// The stream is lazy, finite and cannot be restarted. Provider page
    /// limits are handled internally. Items whose metadata could not be
    /// fetched are yielded as `Err` and the stream carries on.
    ///
    /// # Notes
    /// - `prefix` is a plain string prefix of the key, not a directory:
    ///   `"docs/re"` matches `"docs/report.pdf"`.
    ///
    /// # Examples
    ///
    /// ```
    /// use futures::TryStreamExt;
    /// # use skyvault_storage::{StorageAdapter, error::Result};
    /// # async fn example(adapter: &dyn StorageAdapter) -> Result<()> {
    /// let mut stream = adapter.list_stream("bucket", "reports/");
    /// while let Some(info) = stream.try_next().await? {
    ///     println!("{} ({} bytes)", info.storage_path, info.size);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    fn list_stream<'a>(&'a self, bucket: &'a str, prefix: &'a str) -> FileInfoStream<'a>;

    /// Delete an object. Deleting a key that does not exist succeeds.
    async fn delete(&self, bucket: &str, key: &str) -> Result<()>;

    /// Fetch object metadata without reading its contents.
    ///
    /// Returns [`NotFound`](ErrorKind::NotFound) if the key does not exist.
    async fn get_metadata(&self, bucket: &str, key: &str) -> Result<FileInfo>;

    /// Merge `metadata` into the object's existing custom metadata.
    ///
    /// # Notes
    /// - Object stores treat metadata as immutable, so implementations
    ///   read the current attributes, merge, and rewrite the object onto
    ///   itself. This is a non-atomic read-modify-write: a concurrent writer
    ///   of the same key can be overwritten.
    async fn update_metadata(&self, bucket: &str, key: &str, metadata: &HashMap<String, String>) -> Result<()>;
}

/// Drain exactly `size` bytes out of an upload body.
///
/// Providers need the whole payload (or at least its exact length) up front,
/// so adapters buffer the body through here before sending it.
pub(crate) async fn read_body(body: BoxAsyncRead, size: u64) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    body.take(size).read_to_end(&mut buffer).await.map_err(ErrorKind::Io)?;
    let actual = buffer.len() as u64;
    if actual != size {
        exn::bail!(ErrorKind::SizeMismatch { expected: size, actual });
    }
    Ok(buffer)
}

/// Prefix filter shared by adapters whose listing API is directory-based.
///
/// Returns the deepest complete directory of `prefix` (no trailing slash),
/// which is the narrowest listing root that still contains every match.
#[cfg_attr(not(any(feature = "gcs", test)), allow(dead_code))]
pub(crate) fn listing_root(prefix: &str) -> Option<&str> {
    prefix.rfind('/').map(|idx| prefix[..idx].trim_end_matches('/')).filter(|dir| !dir.is_empty())
}
