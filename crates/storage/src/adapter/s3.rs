//! S3-compatible storage adapter.
//!
//! This module provides a storage adapter implementation for S3-compatible
//! services including AWS S3, Backblaze B2, Tigris (Fly.io), MinIO, and others.
//!
//! # Credentials
//!
//! Credentials are provided explicitly via the configuration (see
//! [`AwsConfig`]). The adapter does not consult the AWS credential chain.
//!
//! # Metadata
//!
//! Custom metadata is sent as `x-amz-meta-*` headers; the SDK applies the
//! prefix itself, so keys are passed through as given. S3 lower-cases keys on
//! the way in, which is what [`get_metadata()`](S3Adapter::get_metadata)
//! reports back.

use crate::adapter::{BoxAsyncRead, FileInfoStream, read_body};
use crate::error::{Error, ErrorKind, Operation, Result};
use crate::models::{CONTENT_TYPE_KEY, DEFAULT_CONTENT_TYPE, FileInfo, storage_path};
use crate::StorageAdapter;
use async_stream::stream;
use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{BehaviorVersion, Credentials, Region, retry::RetryConfig},
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    primitives::{ByteStream, DateTime},
    types::MetadataDirective,
};
use exn::ResultExt;
use skyvault_config::AwsConfig;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::instrument;

/// Generous default for concurrent S3 requests.
const DEFAULT_CONCURRENT_REQUESTS: usize = 100;
const SCHEME: &str = "s3";
/// Service error codes that mean "your credentials are wrong", which callers
/// should treat like any other transport failure rather than a rejected
/// request.
const AUTH_ERROR_CODES: &[&str] =
    &["AccessDenied", "InvalidAccessKeyId", "SignatureDoesNotMatch", "ExpiredToken", "InvalidToken"];

/// S3-compatible storage adapter.
///
/// # Examples
///
/// ```no_run
/// use skyvault_storage::adapter::S3Adapter;
///
/// let adapter = S3Adapter::new(
///     "aws",
///     "us-west-004",
///     Some("https://s3.us-west-004.backblazeb2.com"),
///     "access_key_id",
///     "secret_access_key",
///     1,
/// );
/// ```
#[derive(Debug, Clone)]
pub struct S3Adapter {
    name: String,
    client: Client,
    /// Rate limiter for concurrent S3 requests.
    rate_limiter: Arc<Semaphore>,
}

impl S3Adapter {
    /// Create a new S3 storage adapter.
    ///
    /// # Arguments
    /// * `name` - Registry name of this adapter (used in [`FileInfo::provider`] and logging)
    /// * `region` - AWS region or provider-specific region (e.g., "us-west-004" for Backblaze)
    /// * `endpoint` - Custom endpoint URL for S3-compatible services
    /// * `key_id` - AWS/provider access key ID
    /// * `key_secret` - AWS/provider secret access key
    /// * `max_attempts` - Total attempts per SDK call; `1` disables SDK retries
    pub fn new(
        name: impl Into<String>,
        region: impl Into<String>,
        endpoint: Option<impl Into<String>>,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
        max_attempts: u32,
    ) -> Self {
        let region = Region::new(region.into());
        let credentials = Credentials::new(key_id, key_secret, None, None, "skyvault-config");
        let mut config_builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(region)
            .retry_config(RetryConfig::standard().with_max_attempts(max_attempts.max(1)))
            // Use path-style addressing for better compatibility with
            // S3-compatible services (Backblaze, MinIO, etc.)
            .force_path_style(true);
        // Set custom endpoint for non-AWS services
        if let Some(endpoint_url) = endpoint {
            config_builder = config_builder.endpoint_url(endpoint_url);
        }
        Self::from_client(name, Client::from_conf(config_builder.build()))
    }

    /// Create an adapter from the `storage.aws` configuration table.
    pub fn from_config(name: impl Into<String>, config: &AwsConfig) -> Self {
        Self::new(
            name,
            config.region.clone(),
            config.endpoint.clone(),
            config.access_key_id.clone(),
            config.secret_access_key.clone(),
            config.max_attempts,
        )
    }

    /// Wrap an already-configured SDK client.
    pub fn from_client(name: impl Into<String>, client: Client) -> Self {
        Self {
            name: name.into(),
            client,
            rate_limiter: Arc::new(Semaphore::new(DEFAULT_CONCURRENT_REQUESTS)),
        }
    }

    /// Acquire a rate limiter permit before making an S3 API call.
    /// Cap the number of S3 requests in flight at once.
    pub fn with_max_concurrent_requests(mut self, max: usize) -> Self {
        self.rate_limiter = Arc::new(Semaphore::new(max));
        self
    }

    async fn acquire_permit(&self) -> Result<OwnedSemaphorePermit> {
        self.rate_limiter
            .clone()
            .acquire_owned()
            .await
            .or_raise(|| ErrorKind::Config("S3 request limiter was closed".to_string()))
    }

    /// Convert AWS DateTime to OffsetDateTime.
    fn parse_datetime(&self, dt: &DateTime) -> Result<OffsetDateTime> {
        OffsetDateTime::from_unix_timestamp_nanos(dt.as_nanos()).or_raise(|| ErrorKind::Backend {
            provider: self.name.clone(),
            operation: Operation::GetMetadata,
            reason: "S3 datetime out of range".to_string(),
        })
    }

    /// Sort an SDK failure into the storage error taxonomy.
    ///
    /// `missing` decides whether a service error means the object does not
    /// exist; each operation has its own modelled "not found" variant.
    fn sdk_error<E, R>(
        &self,
        operation: Operation,
        location: &str,
        err: SdkError<E, R>,
        missing: impl FnOnce(&E) -> bool,
    ) -> Error
    where
        E: ProvideErrorMetadata + std::error::Error + 'static,
        R: Debug,
    {
        let reason = DisplayErrorContext(&err).to_string();
        let provider = self.name.clone();
        let kind = match err.as_service_error() {
            Some(service) if missing(service) => ErrorKind::NotFound(location.to_string()),
            Some(service) if service.code().is_some_and(|code| AUTH_ERROR_CODES.contains(&code)) => {
                ErrorKind::Transport { provider, operation, reason }
            },
            Some(_) => ErrorKind::Backend { provider, operation, reason },
            // Construction, dispatch, timeout and unparseable responses.
            None => ErrorKind::Transport { provider, operation, reason },
        };
        Error::from(kind)
    }
}

/// `CopySource` is sent as a header, so the key has to be percent-encoded
/// (everything except RFC 3986 unreserved characters and `/`).
fn copy_source(bucket: &str, key: &str) -> String {
    let mut encoded = String::with_capacity(bucket.len() + key.len() + 1);
    encoded.push_str(bucket);
    encoded.push('/');
    for byte in key.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' | b'/' => encoded.push(byte as char),
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

#[async_trait]
impl StorageAdapter for S3Adapter {
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
        let data = read_body(body, size).await?;
        let (content_type, custom) = FileInfo::split_content_type(metadata);
        let location = storage_path(SCHEME, bucket, key);
        let content_length = i64::try_from(size).or_raise(|| ErrorKind::Backend {
            provider: self.name.clone(),
            operation: Operation::Upload,
            reason: format!("object of {size} bytes exceeds the S3 size limit"),
        })?;
        let _permit = self.acquire_permit().await?;
        let output = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_length(content_length)
            .content_type(&content_type)
            .set_metadata(Some(custom.clone()))
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| self.sdk_error(Operation::Upload, &location, e, |_| false))?;
        Ok(FileInfo {
            name: key.to_string(),
            size,
            content_type,
            // PutObject does not echo the stored timestamp back.
            last_modified: OffsetDateTime::now_utc(),
            etag: output.e_tag().unwrap_or_default().to_string(),
            version_id: output.version_id().map(str::to_string),
            custom_metadata: custom,
            provider: self.name.clone(),
            storage_path: location,
        })
    }

    async fn download(&self, bucket: &str, key: &str) -> Result<BoxAsyncRead> {
        let location = storage_path(SCHEME, bucket, key);
        let _permit = self.acquire_permit().await?;
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| self.sdk_error(Operation::Download, &location, e, |e| e.is_no_such_key()))?;
        Ok(Box::pin(output.body.into_async_read()))
    }

    fn list_stream<'a>(&'a self, bucket: &'a str, prefix: &'a str) -> FileInfoStream<'a> {
        Box::pin(stream! {
            let mut pages = self.client.list_objects_v2().bucket(bucket).prefix(prefix).into_paginator().send();
            loop {
                // Held for the page request only; the HEADs below take their own.
                let page = match self.acquire_permit().await {
                    Ok(_permit) => pages.next().await,
                    Err(e) => {
                        yield Err(e);
                        return;
                    },
                };
                let Some(page) = page else {
                    break;
                };
                let page = match page {
                    Ok(page) => page,
                    // A failed page leaves no continuation token to resume from.
                    Err(e) => {
                        yield Err(self.sdk_error(Operation::List, &storage_path(SCHEME, bucket, prefix), e, |_| false));
                        return;
                    },
                };
                for object in page.contents() {
                    let Some(key) = object.key() else {
                        continue;
                    };
                    // ListObjectsV2 carries neither content type nor custom
                    // metadata, so every item costs a HEAD request.
                    yield self.get_metadata(bucket, key).await;
                }
            }
        })
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        let location = storage_path(SCHEME, bucket, key);
        let _permit = self.acquire_permit().await?;
        // S3 answers 204 for keys that never existed.
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| self.sdk_error(Operation::Delete, &location, e, |_| false))?;
        Ok(())
    }

    async fn get_metadata(&self, bucket: &str, key: &str) -> Result<FileInfo> {
        let location = storage_path(SCHEME, bucket, key);
        let _permit = self.acquire_permit().await?;
        let output = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| self.sdk_error(Operation::GetMetadata, &location, e, |e| e.is_not_found()))?;
        let last_modified = match output.last_modified() {
            Some(dt) => self.parse_datetime(dt)?,
            None => OffsetDateTime::UNIX_EPOCH,
        };
        Ok(FileInfo {
            name: key.to_string(),
            size: output.content_length().and_then(|len| u64::try_from(len).ok()).unwrap_or(0),
            content_type: output.content_type().unwrap_or(DEFAULT_CONTENT_TYPE).to_string(),
            last_modified,
            etag: output.e_tag().unwrap_or_default().to_string(),
            version_id: output.version_id().map(str::to_string),
            custom_metadata: output.metadata().cloned().unwrap_or_default(),
            provider: self.name.clone(),
            storage_path: location,
        })
    }

    #[instrument(skip(self, metadata), fields(provider = %self.name))]
    async fn update_metadata(&self, bucket: &str, key: &str, metadata: &HashMap<String, String>) -> Result<()> {
        let existing = self.get_metadata(bucket, key).await?;
        let content_type = metadata.get(CONTENT_TYPE_KEY).cloned().unwrap_or(existing.content_type);
        let mut merged = existing.custom_metadata;
        merged.extend(metadata.iter().filter(|(k, _)| *k != CONTENT_TYPE_KEY).map(|(k, v)| (k.clone(), v.clone())));

        let location = storage_path(SCHEME, bucket, key);
        let _permit = self.acquire_permit().await?;
        // REPLACE drops every header that isn't resent, so the content type
        // has to travel with the new metadata.
        self.client
            .copy_object()
            .bucket(bucket)
            .key(key)
            .copy_source(copy_source(bucket, key))
            .metadata_directive(MetadataDirective::Replace)
            .content_type(content_type)
            .set_metadata(Some(merged))
            .send()
            .await
            .map_err(|e| self.sdk_error(Operation::UpdateMetadata, &location, e, |_| false))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::error::ErrorMetadata;
    use aws_sdk_s3::operation::copy_object::CopyObjectOutput;
    use aws_sdk_s3::operation::delete_object::{DeleteObjectError, DeleteObjectOutput};
    use aws_sdk_s3::operation::get_object::{GetObjectError, GetObjectOutput};
    use aws_sdk_s3::operation::head_object::{HeadObjectError, HeadObjectOutput};
    use aws_sdk_s3::operation::list_objects_v2::ListObjectsV2Output;
    use aws_sdk_s3::operation::put_object::{PutObjectError, PutObjectOutput};
    use aws_sdk_s3::types::Object;
    use aws_sdk_s3::types::error::{NoSuchKey, NotFound};
    use aws_smithy_mocks::{RuleMode, mock, mock_client};
    use futures::StreamExt;
    use rstest::rstest;
    use std::io::Cursor;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    fn body(data: &'static [u8]) -> BoxAsyncRead {
        Box::pin(Cursor::new(data))
    }

    #[rstest]
    #[case("bucket", "id/report.pdf", "bucket/id/report.pdf")]
    #[case("bucket", "id/my file.txt", "bucket/id/my%20file.txt")]
    #[case("b", "a+b&c", "b/a%2Bb%26c")]
    #[case("b", "ünï", "b/%C3%BCn%C3%AF")]
    fn test_copy_source(#[case] bucket: &str, #[case] key: &str, #[case] expected: &str) {
        assert_eq!(copy_source(bucket, key), expected);
    }

    #[tokio::test]
    async fn test_upload() {
        let put = mock!(Client::put_object)
            .match_requests(|req| {
                req.bucket() == Some("bucket")
                    && req.key() == Some("id/report.pdf")
                    && req.content_type() == Some("application/pdf")
                    && req.metadata().is_some_and(|m| m.get("owner").map(String::as_str) == Some("alice"))
                    && req.metadata().is_some_and(|m| !m.contains_key(CONTENT_TYPE_KEY))
            })
            .then_output(|| PutObjectOutput::builder().e_tag("\"abc\"").version_id("v1").build());
        let client = mock_client!(aws_sdk_s3, RuleMode::Sequential, [&put]);
        let adapter = S3Adapter::from_client("aws", client);

        let metadata = HashMap::from([
            (CONTENT_TYPE_KEY.to_string(), "application/pdf".to_string()),
            ("owner".to_string(), "alice".to_string()),
        ]);
        let info = adapter.upload("bucket", "id/report.pdf", body(b"%PDF-1.7"), 8, &metadata).await.unwrap();
        assert_eq!(put.num_calls(), 1);
        assert_eq!(info.name, "id/report.pdf");
        assert_eq!(info.size, 8);
        assert_eq!(info.content_type, "application/pdf");
        assert_eq!(info.etag, "\"abc\"");
        assert_eq!(info.version_id.as_deref(), Some("v1"));
        assert_eq!(info.provider, "aws");
        assert_eq!(info.storage_path, "s3://bucket/id/report.pdf");
        assert_eq!(info.custom_metadata.get("owner").map(String::as_str), Some("alice"));
    }

    #[tokio::test]
    async fn test_upload_short_body_never_reaches_s3() {
        let put = mock!(Client::put_object).then_output(|| PutObjectOutput::builder().build());
        let client = mock_client!(aws_sdk_s3, RuleMode::Sequential, [&put]);
        let adapter = S3Adapter::from_client("aws", client);
        let err = adapter.upload("bucket", "k", body(b"abc"), 10, &HashMap::new()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::SizeMismatch { expected: 10, actual: 3 }));
        assert_eq!(put.num_calls(), 0);
    }

    #[rstest]
    #[case("InternalError", false)]
    #[case("AccessDenied", true)]
    #[tokio::test]
    async fn test_upload_service_error(#[case] code: &'static str, #[case] transport: bool) {
        let put = mock!(Client::put_object)
            .then_error(move || PutObjectError::generic(ErrorMetadata::builder().code(code).message("nope").build()));
        let client = mock_client!(aws_sdk_s3, RuleMode::Sequential, [&put]);
        let adapter = S3Adapter::from_client("aws", client);
        let err = adapter.upload("bucket", "k", body(b"abc"), 3, &HashMap::new()).await.unwrap_err();
        match &*err {
            ErrorKind::Transport { provider, operation, .. } if transport => {
                assert_eq!(provider, "aws");
                assert_eq!(*operation, Operation::Upload);
            },
            ErrorKind::Backend { provider, operation, .. } if !transport => {
                assert_eq!(provider, "aws");
                assert_eq!(*operation, Operation::Upload);
            },
            other => panic!("unexpected error kind: {other}"),
        }
    }

    #[tokio::test]
    async fn test_get_metadata() {
        let head = mock!(Client::head_object)
            .match_requests(|req| req.bucket() == Some("bucket") && req.key() == Some("id/a.txt"))
            .then_output(|| {
                HeadObjectOutput::builder()
                    .content_length(5)
                    .content_type("text/plain")
                    .e_tag("\"e1\"")
                    .last_modified(DateTime::from_secs(1_700_000_000))
                    .metadata("content-blake3", "deadbeef")
                    .build()
            });
        let client = mock_client!(aws_sdk_s3, RuleMode::Sequential, [&head]);
        let adapter = S3Adapter::from_client("aws", client);
        let info = adapter.get_metadata("bucket", "id/a.txt").await.unwrap();
        assert_eq!(info.size, 5);
        assert_eq!(info.content_type, "text/plain");
        assert_eq!(info.etag, "\"e1\"");
        assert_eq!(info.version_id, None);
        assert_eq!(info.last_modified.unix_timestamp(), 1_700_000_000);
        assert_eq!(info.custom_metadata.get("content-blake3").map(String::as_str), Some("deadbeef"));
    }

    #[tokio::test]
    async fn test_get_metadata_not_found() {
        let head = mock!(Client::head_object).then_error(|| HeadObjectError::NotFound(NotFound::builder().build()));
        let client = mock_client!(aws_sdk_s3, RuleMode::Sequential, [&head]);
        let adapter = S3Adapter::from_client("aws", client);
        let err = adapter.get_metadata("bucket", "missing").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(path) if path == "s3://bucket/missing"));
    }

    #[tokio::test]
    async fn test_list_fetches_metadata_per_item() {
        let list = mock!(Client::list_objects_v2)
            .match_requests(|req| req.bucket() == Some("bucket") && req.prefix() == Some("docs/"))
            .then_output(|| {
                ListObjectsV2Output::builder()
                    .contents(Object::builder().key("docs/a.txt").size(1).build())
                    .contents(Object::builder().key("docs/b.txt").size(2).build())
                    .build()
            });
        let head_a = mock!(Client::head_object)
            .match_requests(|req| req.key() == Some("docs/a.txt"))
            .then_output(|| HeadObjectOutput::builder().content_length(1).content_type("text/plain").build());
        let head_b = mock!(Client::head_object)
            .match_requests(|req| req.key() == Some("docs/b.txt"))
            .then_output(|| HeadObjectOutput::builder().content_length(2).content_type("text/csv").build());
        let client = mock_client!(aws_sdk_s3, RuleMode::Sequential, [&list, &head_a, &head_b]);
        let adapter = S3Adapter::from_client("aws", client);

        let files = adapter.list("bucket", "docs/").await.unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].name, "docs/a.txt");
        assert_eq!(files[0].content_type, "text/plain");
        assert_eq!(files[1].name, "docs/b.txt");
        assert_eq!(files[1].size, 2);
        assert_eq!(head_a.num_calls() + head_b.num_calls(), 2);
    }

    #[tokio::test]
    async fn test_update_metadata_copies_onto_itself() {
        let head = mock!(Client::head_object).then_output(|| {
            HeadObjectOutput::builder().content_type("text/plain").metadata("a", "1").metadata("b", "2").build()
        });
        let copy = mock!(Client::copy_object)
            .match_requests(|req| {
                let expected = HashMap::from([
                    ("a".to_string(), "1".to_string()),
                    ("b".to_string(), "3".to_string()),
                    ("c".to_string(), "4".to_string()),
                ]);
                req.bucket() == Some("bucket")
                    && req.key() == Some("id/my file.txt")
                    && req.copy_source() == Some("bucket/id/my%20file.txt")
                    && req.metadata_directive() == Some(&MetadataDirective::Replace)
                    && req.content_type() == Some("text/plain")
                    && req.metadata() == Some(&expected)
            })
            .then_output(|| CopyObjectOutput::builder().build());
        let client = mock_client!(aws_sdk_s3, RuleMode::Sequential, [&head, &copy]);
        let adapter = S3Adapter::from_client("aws", client);

        let updates = HashMap::from([("b".to_string(), "3".to_string()), ("c".to_string(), "4".to_string())]);
        adapter.update_metadata("bucket", "id/my file.txt", &updates).await.unwrap();
        assert_eq!(copy.num_calls(), 1);
    }

    #[tokio::test]
    async fn test_download() {
        let get = mock!(Client::get_object)
            .match_requests(|req| req.bucket() == Some("bucket") && req.key() == Some("id/a.txt"))
            .then_output(|| GetObjectOutput::builder().body(ByteStream::from_static(b"hello")).build());
        let client = mock_client!(aws_sdk_s3, RuleMode::Sequential, [&get]);
        let adapter = S3Adapter::from_client("aws", client);
        let Ok(mut reader) = adapter.download("bucket", "id/a.txt").await else {
            panic!("download failed");
        };
        let mut data = Vec::new();
        reader.read_to_end(&mut data).await.unwrap();
        assert_eq!(data, b"hello");
        assert_eq!(get.num_calls(), 1);
    }

    #[tokio::test]
    async fn test_download_not_found() {
        let get = mock!(Client::get_object).then_error(|| GetObjectError::NoSuchKey(NoSuchKey::builder().build()));
        let client = mock_client!(aws_sdk_s3, RuleMode::Sequential, [&get]);
        let adapter = S3Adapter::from_client("aws", client);
        let Err(err) = adapter.download("bucket", "missing").await else {
            panic!("download of a missing key succeeded");
        };
        assert!(matches!(&*err, ErrorKind::NotFound(path) if path == "s3://bucket/missing"));
    }

    #[tokio::test]
    async fn test_delete() {
        let delete = mock!(Client::delete_object)
            .match_requests(|req| req.bucket() == Some("bucket") && req.key() == Some("id/a.txt"))
            .then_output(|| DeleteObjectOutput::builder().build());
        let client = mock_client!(aws_sdk_s3, RuleMode::Sequential, [&delete]);
        let adapter = S3Adapter::from_client("aws", client);
        adapter.delete("bucket", "id/a.txt").await.unwrap();
        assert_eq!(delete.num_calls(), 1);
    }

    #[tokio::test]
    async fn test_delete_access_denied() {
        let delete = mock!(Client::delete_object).then_error(|| {
            DeleteObjectError::generic(ErrorMetadata::builder().code("AccessDenied").message("denied").build())
        });
        let client = mock_client!(aws_sdk_s3, RuleMode::Sequential, [&delete]);
        let adapter = S3Adapter::from_client("aws", client);
        let err = adapter.delete("bucket", "id/a.txt").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Transport { operation: Operation::Delete, .. }));
    }

    #[tokio::test]
    async fn test_list_follows_pages_past_failed_items() {
        let page_one = mock!(Client::list_objects_v2)
            .match_requests(|req| req.continuation_token().is_none())
            .then_output(|| {
                ListObjectsV2Output::builder()
                    .contents(Object::builder().key("a").build())
                    .is_truncated(true)
                    .next_continuation_token("page-2")
                    .build()
            });
        let head_a = mock!(Client::head_object).match_requests(|req| req.key() == Some("a")).then_error(|| {
            HeadObjectError::generic(ErrorMetadata::builder().code("InvalidObjectState").message("archived").build())
        });
        let page_two = mock!(Client::list_objects_v2)
            .match_requests(|req| req.continuation_token() == Some("page-2"))
            .then_output(|| {
                ListObjectsV2Output::builder().contents(Object::builder().key("b").build()).is_truncated(false).build()
            });
        let head_b = mock!(Client::head_object)
            .match_requests(|req| req.key() == Some("b"))
            .then_output(|| HeadObjectOutput::builder().content_length(2).build());
        let client = mock_client!(aws_sdk_s3, RuleMode::Sequential, [&page_one, &head_a, &page_two, &head_b]);
        let adapter = S3Adapter::from_client("aws", client);

        let results: Vec<_> = adapter.list_stream("bucket", "").collect().await;
        assert_eq!(results.len(), 2);
        match &results[0] {
            Err(err) => assert!(matches!(&**err, ErrorKind::Backend { operation: Operation::GetMetadata, .. })),
            Ok(info) => panic!("expected the HEAD of a to fail, got {}", info.name),
        }
        assert_eq!(results[1].as_ref().ok().map(|info| (info.name.as_str(), info.size)), Some(("b", 2)));
        assert_eq!(page_one.num_calls() + page_two.num_calls(), 2);
    }

    #[tokio::test]
    async fn test_list_pages_wait_for_a_permit() {
        let list = mock!(Client::list_objects_v2).then_output(|| ListObjectsV2Output::builder().build());
        let client = mock_client!(aws_sdk_s3, RuleMode::Sequential, [&list]);
        let adapter = S3Adapter::from_client("aws", client).with_max_concurrent_requests(1);

        let held = adapter.acquire_permit().await.unwrap();
        let mut stream = adapter.list_stream("bucket", "");
        assert!(tokio::time::timeout(Duration::from_millis(50), stream.next()).await.is_err());
        assert_eq!(list.num_calls(), 0);

        drop(held);
        assert!(stream.next().await.is_none());
        assert_eq!(list.num_calls(), 1);
    }

    #[tokio::test]
    async fn test_list_with_a_single_permit() {
        let list = mock!(Client::list_objects_v2)
            .then_output(|| ListObjectsV2Output::builder().contents(Object::builder().key("a").build()).build());
        let head = mock!(Client::head_object).then_output(|| HeadObjectOutput::builder().content_length(1).build());
        let client = mock_client!(aws_sdk_s3, RuleMode::Sequential, [&list, &head]);
        let adapter = S3Adapter::from_client("aws", client).with_max_concurrent_requests(1);
        let files = adapter.list("bucket", "").await.unwrap();
        assert_eq!(files.len(), 1);
    }
}
