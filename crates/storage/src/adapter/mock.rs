//! In-memory storage adapter for testing.

use super::{BoxAsyncRead, FileInfoStream, read_body};
use crate::error::{ErrorKind, Operation, Result};
use crate::models::{CONTENT_TYPE_KEY, FileInfo, storage_path};
use async_stream::stream;
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::StorageAdapter;

const SCHEME: &str = "mock";

/// Failure injected into a [`MockAdapter`] operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    /// Fail as if the network dropped ([`ErrorKind::Transport`]).
    Transport,
    /// Fail as if the provider rejected the request ([`ErrorKind::Backend`]).
    Backend,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    content_type: String,
    custom: HashMap<String, String>,
    last_modified: OffsetDateTime,
    generation: u64,
}

/// In-memory storage adapter for testing.
///
/// Objects are stored in a `HashMap` keyed by `(bucket, key)` behind a
/// [`RwLock`], so all trait methods can operate on `&self` without external
/// synchronisation. Individual operations can be made to fail, and every call
/// can be slowed down to exercise concurrent fan-out.
///
/// # Examples
///
/// ```
/// use skyvault_storage::StorageAdapter;
/// use skyvault_storage::adapter::{MockAdapter, MockFailure};
/// use skyvault_storage::error::Operation;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let healthy = MockAdapter::new("aws").with_object("bucket", "id/hello.txt", b"hello");
/// assert_eq!(healthy.get_metadata("bucket", "id/hello.txt").await.unwrap().size, 5);
///
/// let broken = MockAdapter::new("gcp").failing(Operation::Upload, MockFailure::Transport);
/// assert_eq!(broken.provider(), "gcp");
/// # }
/// ```
#[derive(Debug)]
pub struct MockAdapter {
    name: String,
    objects: RwLock<HashMap<(String, String), StoredObject>>,
    failures: HashMap<Operation, MockFailure>,
    latency: Option<Duration>,
    generation: AtomicU64,
    uploads: AtomicUsize,
    deletes: AtomicUsize,
}

impl MockAdapter {
    /// Create an empty mock adapter registered under `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            objects: RwLock::new(HashMap::new()),
            failures: HashMap::new(),
            latency: None,
            generation: AtomicU64::new(0),
            uploads: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
        }
    }

    /// Pre-populate an object (content type `application/octet-stream`).
    pub fn with_object(mut self, bucket: &str, key: &str, data: impl Into<Vec<u8>>) -> Self {
        let object = self.stored(data.into(), FileInfo::split_content_type(&HashMap::new()));
        self.objects.get_mut().insert((bucket.to_string(), key.to_string()), object);
        self
    }

    /// Make every call to `operation` fail with `failure`.
    pub fn failing(mut self, operation: Operation, failure: MockFailure) -> Self {
        self.failures.insert(operation, failure);
        self
    }

    /// Sleep for `latency` at the start of every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Number of upload calls received, including failed ones.
    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    /// Number of delete calls received, including failed ones.
    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    /// Raw bytes currently stored at `bucket/key`.
    pub async fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects.read().await.get(&(bucket.to_string(), key.to_string())).map(|o| o.data.clone())
    }

    /// Number of stored objects across all buckets.
    pub async fn object_count(&self) -> usize {
        self.objects.read().await.len()
    }

    fn stored(&self, data: Vec<u8>, (content_type, custom): (String, HashMap<String, String>)) -> StoredObject {
        StoredObject {
            data,
            content_type,
            custom,
            last_modified: OffsetDateTime::now_utc(),
            generation: self.generation.fetch_add(1, Ordering::SeqCst) + 1,
        }
    }

    fn file_info(&self, bucket: &str, key: &str, object: &StoredObject) -> FileInfo {
        FileInfo {
            name: key.to_string(),
            size: object.data.len() as u64,
            content_type: object.content_type.clone(),
            last_modified: object.last_modified,
            etag: format!("\"{:016x}\"", object.generation),
            version_id: Some(object.generation.to_string()),
            custom_metadata: object.custom.clone(),
            provider: self.name.clone(),
            storage_path: storage_path(SCHEME, bucket, key),
        }
    }

    /// Apply the configured latency, then any injected failure.
    async fn enter(&self, operation: Operation) -> Result<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let provider = self.name.clone();
        let reason = "injected failure".to_string();
        match self.failures.get(&operation) {
            Some(MockFailure::Transport) => exn::bail!(ErrorKind::Transport { provider, operation, reason }),
            Some(MockFailure::Backend) => exn::bail!(ErrorKind::Backend { provider, operation, reason }),
            None => Ok(()),
        }
    }

    fn not_found(bucket: &str, key: &str) -> ErrorKind {
        ErrorKind::NotFound(storage_path(SCHEME, bucket, key))
    }
}

#[async_trait]
impl StorageAdapter for MockAdapter {
    fn provider(&self) -> &str {
        &self.name
    }

    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        body: BoxAsyncRead,
        size: u64,
        metadata: &HashMap<String, String>,
    ) -> Result<FileInfo> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        self.enter(Operation::Upload).await?;
        let data = read_body(body, size).await?;
        let object = self.stored(data, FileInfo::split_content_type(metadata));
        let info = self.file_info(bucket, key, &object);
        self.objects.write().await.insert((bucket.to_string(), key.to_string()), object);
        Ok(info)
    }

    async fn download(&self, bucket: &str, key: &str) -> Result<BoxAsyncRead> {
        self.enter(Operation::Download).await?;
        let data = self.object(bucket, key).await.ok_or_else(|| exn::Exn::from(Self::not_found(bucket, key)))?;
        Ok(Box::pin(Cursor::new(data)))
    }

    fn list_stream<'a>(&'a self, bucket: &'a str, prefix: &'a str) -> FileInfoStream<'a> {
        Box::pin(stream! {
            if let Err(e) = self.enter(Operation::List).await {
                yield Err(e);
                return;
            }
            // Snapshot matching entries under the read lock, then drop it
            // before yielding to avoid holding the lock across yield points.
            let mut entries: Vec<FileInfo> = {
                let guard = self.objects.read().await;
                guard
                    .iter()
                    .filter(|((b, k), _)| b == bucket && k.starts_with(prefix))
                    .map(|((_, k), object)| self.file_info(bucket, k, object))
                    .collect()
            };
            entries.sort_by(|a, b| a.name.cmp(&b.name));
            for info in entries {
                yield Ok(info);
            }
        })
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.enter(Operation::Delete).await?;
        self.objects.write().await.remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }

    async fn get_metadata(&self, bucket: &str, key: &str) -> Result<FileInfo> {
        self.enter(Operation::GetMetadata).await?;
        let guard = self.objects.read().await;
        let object = guard
            .get(&(bucket.to_string(), key.to_string()))
            .ok_or_else(|| exn::Exn::from(Self::not_found(bucket, key)))?;
        Ok(self.file_info(bucket, key, object))
    }

    async fn update_metadata(&self, bucket: &str, key: &str, metadata: &HashMap<String, String>) -> Result<()> {
        self.enter(Operation::UpdateMetadata).await?;
        let mut guard = self.objects.write().await;
        let object = guard
            .get_mut(&(bucket.to_string(), key.to_string()))
            .ok_or_else(|| exn::Exn::from(Self::not_found(bucket, key)))?;
        for (k, v) in metadata {
            if k == CONTENT_TYPE_KEY {
                object.content_type = v.clone();
            } else {
                object.custom.insert(k.clone(), v.clone());
            }
        }
        object.generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DEFAULT_CONTENT_TYPE;
    use tokio::io::AsyncReadExt;

    fn body(data: &'static [u8]) -> BoxAsyncRead {
        Box::pin(Cursor::new(data))
    }

    #[tokio::test]
    async fn test_upload_and_download() {
        let adapter = MockAdapter::new("mock");
        let metadata = HashMap::from([
            (CONTENT_TYPE_KEY.to_string(), "text/plain".to_string()),
            ("owner".to_string(), "alice".to_string()),
        ]);
        let info = adapter.upload("b", "id/hello.txt", body(b"hello"), 5, &metadata).await.unwrap();
        assert_eq!(info.size, 5);
        assert_eq!(info.content_type, "text/plain");
        assert_eq!(info.storage_path, "mock://b/id/hello.txt");
        assert_eq!(info.custom_metadata, HashMap::from([("owner".to_string(), "alice".to_string())]));
        assert_eq!(adapter.upload_count(), 1);

        let mut reader = adapter.download("b", "id/hello.txt").await.unwrap();
        let mut data = Vec::new();
        reader.read_to_end(&mut data).await.unwrap();
        assert_eq!(data, b"hello");
    }

    #[tokio::test]
    async fn test_download_not_found() {
        let adapter = MockAdapter::new("mock");
        let Err(err) = adapter.download("b", "missing").await else {
            panic!("download of a missing key succeeded");
        };
        assert!(matches!(&*err, ErrorKind::NotFound(path) if path == "mock://b/missing"));
    }

    #[tokio::test]
    async fn test_list_is_prefix_match() {
        let adapter = MockAdapter::new("mock")
            .with_object("b", "docs/report.pdf", b"1".to_vec())
            .with_object("b", "docs/readme.md", b"2".to_vec())
            .with_object("b", "images/logo.png", b"3".to_vec())
            .with_object("other", "docs/report.pdf", b"4".to_vec());
        let files = adapter.list("b", "docs/re").await.unwrap();
        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["docs/readme.md", "docs/report.pdf"]);
        assert_eq!(adapter.list("b", "").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let adapter = MockAdapter::new("mock").with_object("b", "k", b"data".to_vec());
        adapter.delete("b", "k").await.unwrap();
        adapter.delete("b", "k").await.unwrap();
        assert_eq!(adapter.delete_count(), 2);
        assert_eq!(adapter.object_count().await, 0);
    }

    #[tokio::test]
    async fn test_update_metadata_merges() {
        let adapter = MockAdapter::new("mock");
        let initial = HashMap::from([("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())]);
        let before = adapter.upload("b", "k", body(b"x"), 1, &initial).await.unwrap();
        let updates = HashMap::from([("b".to_string(), "3".to_string()), ("c".to_string(), "4".to_string())]);
        adapter.update_metadata("b", "k", &updates).await.unwrap();

        let after = adapter.get_metadata("b", "k").await.unwrap();
        assert_eq!(after.custom_metadata.len(), 3);
        assert_eq!(after.custom_metadata["a"], "1");
        assert_eq!(after.custom_metadata["b"], "3");
        assert_eq!(after.custom_metadata["c"], "4");
        assert_eq!(after.content_type, DEFAULT_CONTENT_TYPE);
        assert_ne!(after.etag, before.etag);
    }

    #[tokio::test]
    async fn test_update_metadata_not_found() {
        let adapter = MockAdapter::new("mock");
        let err = adapter.update_metadata("b", "k", &HashMap::new()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let adapter = MockAdapter::new("gcp").failing(Operation::Upload, MockFailure::Backend);
        let err = adapter.upload("b", "k", body(b"x"), 1, &HashMap::new()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Backend { provider, operation: Operation::Upload, .. } if provider == "gcp"));
        assert!(!err.is_retryable());
        assert_eq!(adapter.upload_count(), 1);
        assert_eq!(adapter.object_count().await, 0);
        // Other operations are unaffected.
        adapter.delete("b", "k").await.unwrap();
    }

    #[tokio::test]
    async fn test_short_body() {
        let adapter = MockAdapter::new("mock");
        let err = adapter.upload("b", "k", body(b"abc"), 4, &HashMap::new()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::SizeMismatch { expected: 4, actual: 3 }));
        assert_eq!(adapter.object_count().await, 0);
    }
}
