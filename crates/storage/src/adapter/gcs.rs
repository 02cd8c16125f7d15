//! Google Cloud Storage adapter.
//!
//! Built on [`object_store`]'s GCS client. One client is needed per bucket,
//! so clients are created lazily the first time a bucket is addressed and
//! kept for the lifetime of the adapter.
//!
//! # Credentials
//!
//! When `credentials_file` is configured it is used as the service account
//! key; otherwise the standard `GOOGLE_*` environment variables and
//! application-default credentials apply.

use crate::adapter::{BoxAsyncRead, FileInfoStream, listing_root, read_body};
use crate::error::{Error, ErrorKind, Operation, Result};
use crate::models::{CONTENT_TYPE_KEY, DEFAULT_CONTENT_TYPE, FileInfo, storage_path};
use crate::StorageAdapter;
use async_stream::stream;
use async_trait::async_trait;
use exn::ResultExt;
use futures::{StreamExt, TryStreamExt};
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::path::Path as ObjectPath;
use object_store::{Attribute, Attributes, GetOptions, ObjectMeta, ObjectStore, PutOptions, PutPayload};
use skyvault_config::GcpConfig;
use std::collections::HashMap;
use std::error::Error as StdError;
use std::io::Error as IoError;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use time::OffsetDateTime;
use tokio_util::io::StreamReader;
use tracing::instrument;

const SCHEME: &str = "gs";
/// Statuses GCS answers with for bad or missing credentials.
const AUTH_STATUSES: &[u16] = &[401, 403];

/// Google Cloud Storage adapter.
pub struct GcsAdapter {
    name: String,
    credentials_file: Option<PathBuf>,
    stores: Mutex<HashMap<String, Arc<dyn ObjectStore>>>,
}

impl std::fmt::Debug for GcsAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcsAdapter")
            .field("name", &self.name)
            .field("credentials_file", &self.credentials_file)
            .finish_non_exhaustive()
    }
}

impl GcsAdapter {
    /// Create an adapter from the `storage.gcp` configuration table.
    pub fn new(name: impl Into<String>, config: &GcpConfig) -> Self {
        Self {
            name: name.into(),
            credentials_file: config.credentials_file.clone(),
            stores: Mutex::new(HashMap::new()),
        }
    }

    /// Create an adapter that serves `bucket` from an existing store.
    ///
    /// ```
    /// use object_store::memory::InMemory;
    /// use skyvault_storage::adapter::GcsAdapter;
    /// use std::sync::Arc;
    ///
    /// let adapter = GcsAdapter::with_store("gcp", "bucket", Arc::new(InMemory::new()));
    /// ```
    pub fn with_store(name: impl Into<String>, bucket: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            name: name.into(),
            credentials_file: None,
            stores: Mutex::new(HashMap::from([(bucket.into(), store)])),
        }
    }

    /// Client for `bucket`, building it on first use.
    fn store(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>> {
        // Building a client is synchronous, so a poisoned map is still usable.
        let mut stores = self.stores.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(store) = stores.get(bucket) {
            return Ok(Arc::clone(store));
        }
        let mut builder = GoogleCloudStorageBuilder::from_env().with_bucket_name(bucket);
        if let Some(path) = &self.credentials_file {
            builder = builder.with_service_account_path(path.to_string_lossy());
        }
        let store: Arc<dyn ObjectStore> = Arc::new(
            builder.build().or_raise(|| ErrorKind::Config(format!("cannot build GCS client for bucket {bucket}")))?,
        );
        tracing::debug!(provider = %self.name, bucket, "created GCS client");
        stores.insert(bucket.to_string(), Arc::clone(&store));
        Ok(store)
    }

    fn object_path(key: &str) -> Result<ObjectPath> {
        ObjectPath::parse(key).or_raise(|| ErrorKind::InvalidKey(key.to_string()))
    }

    fn store_error(&self, operation: Operation, location: &str, err: object_store::Error) -> Error {
        let provider = self.name.clone();
        let reason = err.to_string();
        let kind = match &err {
            object_store::Error::NotFound { .. } => ErrorKind::NotFound(location.to_string()),
            object_store::Error::InvalidPath { .. } => ErrorKind::InvalidKey(location.to_string()),
            // Unmodelled HTTP statuses arrive as `Generic`, alongside
            // connection and timeout failures which carry no status.
            object_store::Error::Generic { source, .. } => match http_status(source.as_ref()) {
                Some(status) if !AUTH_STATUSES.contains(&status) => ErrorKind::Backend { provider, operation, reason },
                _ => ErrorKind::Transport { provider, operation, reason },
            },
            object_store::Error::PermissionDenied { .. } | object_store::Error::Unauthenticated { .. } => {
                ErrorKind::Transport { provider, operation, reason }
            },
            _ => ErrorKind::Backend { provider, operation, reason },
        };
        Error::from(kind)
    }

    fn file_info(
        &self,
        bucket: &str,
        key: &str,
        meta: &ObjectMeta,
        attributes: &Attributes,
    ) -> Result<FileInfo> {
        let (content_type, custom_metadata) = split_attributes(attributes);
        let nanos = meta.last_modified.timestamp_nanos_opt().unwrap_or_default();
        let last_modified = OffsetDateTime::from_unix_timestamp_nanos(i128::from(nanos)).or_raise(|| {
            ErrorKind::Backend {
                provider: self.name.clone(),
                operation: Operation::GetMetadata,
                reason: "GCS timestamp out of range".to_string(),
            }
        })?;
        Ok(FileInfo {
            name: key.to_string(),
            size: meta.size,
            content_type,
            last_modified,
            etag: meta.e_tag.clone().unwrap_or_default(),
            version_id: meta.version.clone(),
            custom_metadata,
            provider: self.name.clone(),
            storage_path: storage_path(SCHEME, bucket, key),
        })
    }
}

/// HTTP status of a response GCS sent back, if any error in the chain
/// records one (`"... with status 400 Bad Request ..."`).
fn http_status(err: &(dyn StdError + 'static)) -> Option<u16> {
    let mut current = Some(err);
    while let Some(err) = current {
        let message = err.to_string();
        if let Some((_, rest)) = message.split_once("status ") {
            let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
            if let Ok(status) = digits.parse() {
                return Some(status);
            }
        }
        current = err.source();
    }
    None
}

fn split_attributes(attributes: &Attributes) -> (String, HashMap<String, String>) {
    let mut content_type = DEFAULT_CONTENT_TYPE.to_string();
    let mut custom = HashMap::new();
    for (attribute, value) in attributes.iter() {
        match attribute {
            Attribute::ContentType => content_type = value.to_string(),
            Attribute::Metadata(key) => {
                custom.insert(key.to_string(), value.to_string());
            },
            _ => {},
        }
    }
    (content_type, custom)
}

fn merge_attributes(attributes: &mut Attributes, metadata: &HashMap<String, String>) {
    for (key, value) in metadata {
        let attribute = match key.as_str() {
            CONTENT_TYPE_KEY => Attribute::ContentType,
            _ => Attribute::Metadata(key.clone().into()),
        };
        attributes.insert(attribute, value.clone().into());
    }
}

#[async_trait]
impl StorageAdapter for GcsAdapter {
    fn provider(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self, body, metadata), fields(provider = %self.name))]
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        body: BoxAsyncRead,
        size: u64,
        metadata: &HashMap<String, String>,
    ) -> Result<FileInfo> {
        let store = self.store(bucket)?;
        let path = Self::object_path(key)?;
        let data = read_body(body, size).await?;
        let (content_type, custom_metadata) = FileInfo::split_content_type(metadata);

        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, content_type.clone().into());
        merge_attributes(&mut attributes, &custom_metadata);
        let options = PutOptions { attributes, ..Default::default() };

        let location = storage_path(SCHEME, bucket, key);
        let result = store
            .put_opts(&path, PutPayload::from(data), options)
            .await
            .map_err(|e| self.store_error(Operation::Upload, &location, e))?;
        Ok(FileInfo {
            name: key.to_string(),
            size,
            content_type,
            last_modified: OffsetDateTime::now_utc(),
            etag: result.e_tag.unwrap_or_default(),
            version_id: result.version,
            custom_metadata,
            provider: self.name.clone(),
            storage_path: location,
        })
    }

    async fn download(&self, bucket: &str, key: &str) -> Result<BoxAsyncRead> {
        let store = self.store(bucket)?;
        let path = Self::object_path(key)?;
        let location = storage_path(SCHEME, bucket, key);
        let result = store.get(&path).await.map_err(|e| self.store_error(Operation::Download, &location, e))?;
        Ok(Box::pin(StreamReader::new(result.into_stream().map_err(IoError::other))))
    }

    fn list_stream<'a>(&'a self, bucket: &'a str, prefix: &'a str) -> FileInfoStream<'a> {
        Box::pin(stream! {
            let store = match self.store(bucket) {
                Ok(store) => store,
                Err(e) => {
                    yield Err(e);
                    return;
                },
            };
            // GCS lists by path segment; narrow to the enclosing directory
            // and filter the rest by plain string prefix.
            let root = listing_root(prefix).map(ObjectPath::from);
            let mut listing = store.list(root.as_ref());
            while let Some(item) = listing.next().await {
                match item {
                    Ok(meta) => {
                        let key = meta.location.to_string();
                        if key.starts_with(prefix) {
                            // Listings omit attributes.
                            yield self.get_metadata(bucket, &key).await;
                        }
                    },
                    Err(e) => yield Err(self.store_error(Operation::List, &storage_path(SCHEME, bucket, prefix), e)),
                }
            }
        })
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        let store = self.store(bucket)?;
        let path = Self::object_path(key)?;
        match store.delete(&path).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(self.store_error(Operation::Delete, &storage_path(SCHEME, bucket, key), e)),
        }
    }

    async fn get_metadata(&self, bucket: &str, key: &str) -> Result<FileInfo> {
        let store = self.store(bucket)?;
        let path = Self::object_path(key)?;
        let options = GetOptions { head: true, ..Default::default() };
        let result = store
            .get_opts(&path, options)
            .await
            .map_err(|e| self.store_error(Operation::GetMetadata, &storage_path(SCHEME, bucket, key), e))?;
        self.file_info(bucket, key, &result.meta, &result.attributes)
    }

    #[instrument(skip(self, metadata), fields(provider = %self.name))]
    async fn update_metadata(&self, bucket: &str, key: &str, metadata: &HashMap<String, String>) -> Result<()> {
        let store = self.store(bucket)?;
        let path = Self::object_path(key)?;
        let location = storage_path(SCHEME, bucket, key);
        let mut result =
            store.get(&path).await.map_err(|e| self.store_error(Operation::UpdateMetadata, &location, e))?;
        let mut attributes = std::mem::take(&mut result.attributes);
        let data = result.bytes().await.map_err(|e| self.store_error(Operation::UpdateMetadata, &location, e))?;
        merge_attributes(&mut attributes, metadata);
        let options = PutOptions { attributes, ..Default::default() };
        store
            .put_opts(&path, PutPayload::from(data), options)
            .await
            .map_err(|e| self.store_error(Operation::UpdateMetadata, &location, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;
    use rstest::rstest;
    use std::io::Cursor;
    use tokio::io::AsyncReadExt;

    fn adapter() -> GcsAdapter {
        GcsAdapter::with_store("gcp", "bucket", Arc::new(InMemory::new()))
    }

    fn body(data: &'static [u8]) -> BoxAsyncRead {
        Box::pin(Cursor::new(data))
    }

    #[tokio::test]
    async fn test_upload_then_get_metadata() {
        let adapter = adapter();
        let metadata = HashMap::from([
            (CONTENT_TYPE_KEY.to_string(), "application/pdf".to_string()),
            ("owner".to_string(), "alice".to_string()),
        ]);
        let uploaded = adapter.upload("bucket", "id/report.pdf", body(b"%PDF"), 4, &metadata).await.unwrap();
        assert_eq!(uploaded.storage_path, "gs://bucket/id/report.pdf");
        assert_eq!(uploaded.content_type, "application/pdf");
        assert!(!uploaded.etag.is_empty());

        let info = adapter.get_metadata("bucket", "id/report.pdf").await.unwrap();
        assert_eq!(info.name, "id/report.pdf");
        assert_eq!(info.size, 4);
        assert_eq!(info.provider, "gcp");
        assert_eq!(info.content_type, "application/pdf");
        assert_eq!(info.custom_metadata, HashMap::from([("owner".to_string(), "alice".to_string())]));
    }

    #[tokio::test]
    async fn test_download() {
        let adapter = adapter();
        adapter.upload("bucket", "id/a.txt", body(b"hello gcs"), 9, &HashMap::new()).await.unwrap();
        let mut reader = adapter.download("bucket", "id/a.txt").await.unwrap();
        let mut data = Vec::new();
        reader.read_to_end(&mut data).await.unwrap();
        assert_eq!(data, b"hello gcs");
    }

    #[tokio::test]
    async fn test_missing_object() {
        let adapter = adapter();
        let Err(err) = adapter.download("bucket", "nope").await else {
            panic!("download of a missing key succeeded");
        };
        assert!(matches!(&*err, ErrorKind::NotFound(path) if path == "gs://bucket/nope"));
        let err = adapter.get_metadata("bucket", "nope").await.unwrap_err();
        assert!(err.is_not_found());
        // Deleting a missing object succeeds.
        adapter.delete("bucket", "nope").await.unwrap();
    }

    #[tokio::test]
    async fn test_list_string_prefix() {
        let adapter = adapter();
        for key in ["docs/report.pdf", "docs/readme.md", "docs/other.txt", "images/logo.png"] {
            adapter.upload("bucket", key, body(b"x"), 1, &HashMap::new()).await.unwrap();
        }
        let mut names: Vec<_> =
            adapter.list("bucket", "docs/re").await.unwrap().into_iter().map(|f| f.name).collect();
        names.sort();
        assert_eq!(names, ["docs/readme.md", "docs/report.pdf"]);
        assert_eq!(adapter.list("bucket", "").await.unwrap().len(), 4);
        assert!(adapter.list("bucket", "videos/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_metadata_merges() {
        let adapter = adapter();
        let initial = HashMap::from([
            (CONTENT_TYPE_KEY.to_string(), "text/plain".to_string()),
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "2".to_string()),
        ]);
        adapter.upload("bucket", "k.txt", body(b"data"), 4, &initial).await.unwrap();
        let updates = HashMap::from([("b".to_string(), "3".to_string()), ("c".to_string(), "4".to_string())]);
        adapter.update_metadata("bucket", "k.txt", &updates).await.unwrap();

        let info = adapter.get_metadata("bucket", "k.txt").await.unwrap();
        assert_eq!(info.content_type, "text/plain");
        assert_eq!(info.size, 4);
        assert_eq!(
            info.custom_metadata,
            HashMap::from([
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "3".to_string()),
                ("c".to_string(), "4".to_string()),
            ])
        );
    }

    #[tokio::test]
    async fn test_update_metadata_not_found() {
        let err = adapter().update_metadata("bucket", "missing", &HashMap::new()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_invalid_key() {
        let err = adapter().upload("bucket", "a//b", body(b"x"), 1, &HashMap::new()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidKey(_)));
    }

    #[rstest]
    #[case("Client error with status 400 Bad Request: invalid argument", Some(400))]
    #[case("Server error with status 503 Service Unavailable", Some(503))]
    #[case("error sending request for url (https://storage.googleapis.com/)", None)]
    #[case("request timed out", None)]
    fn test_http_status(#[case] message: &str, #[case] expected: Option<u16>) {
        let err: Box<dyn StdError + Send + Sync> = message.into();
        assert_eq!(http_status(err.as_ref()), expected);
    }

    #[rstest]
    #[case("Client error with status 400 Bad Request", false)]
    #[case("Client error with status 429 Too Many Requests", false)]
    #[case("Server error with status 500 Internal Server Error", false)]
    #[case("Client error with status 401 Unauthorized", true)]
    #[case("Client error with status 403 Forbidden", true)]
    #[case("error sending request: connection refused", true)]
    fn test_generic_error_classification(#[case] message: &str, #[case] transport: bool) {
        let source = object_store::Error::Generic { store: "GCS", source: message.into() };
        let err = adapter().store_error(Operation::Upload, "gs://bucket/k", source);
        if transport {
            assert!(matches!(&*err, ErrorKind::Transport { operation: Operation::Upload, .. }));
        } else {
            assert!(matches!(&*err, ErrorKind::Backend { operation: Operation::Upload, .. }));
        }
        assert_eq!(err.is_retryable(), transport);
    }
}
