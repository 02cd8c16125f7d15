use crate::error::{ErrorKind, FailureCause, ProviderFailure, Result, UploadFailures};
use crate::request::{ReplicationPolicy, UploadRequest};
use exn::ResultExt;
use futures::future::join_all;
use skyvault_metadata::error::Result as MetadataResult;
use skyvault_metadata::{FileId, FileMetadata, MetadataStore, ORIGINAL_FILENAME_TAG};
use skyvault_storage::error::ErrorKind as StorageErrorKind;
use skyvault_storage::{CONTENT_TYPE_KEY, DEFAULT_CONTENT_TYPE, FileInfo, StorageManager};
use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::Instrument;

/// Custom metadata key holding the hex BLAKE3 hash of the uploaded bytes.
pub const CHECKSUM_KEY: &str = "content-blake3";

/// Uploads files to every targeted provider and records the result.
///
/// The all-or-nothing rule: a [`FileMetadata`] record is only written once
/// every targeted provider has stored its copy. Any failure fails the whole
/// upload, and whatever copies did land are reported (see
/// [`ErrorKind::orphaned`]) and, if the policy asks for it, deleted again.
pub struct Replicator {
    storage: Arc<StorageManager>,
    metadata: Arc<dyn MetadataStore>,
    policy: ReplicationPolicy,
}

impl Replicator {
    pub fn new(storage: Arc<StorageManager>, metadata: Arc<dyn MetadataStore>, policy: ReplicationPolicy) -> Self {
        Self { storage, metadata, policy }
    }

    pub fn storage(&self) -> &StorageManager {
        &self.storage
    }

    pub fn policy(&self) -> &ReplicationPolicy {
        &self.policy
    }

    /// Providers an upload is sent to, in order of precedence:
    /// 1. every registered provider (sorted by name) when replicating to all,
    /// 2. the override, when given and different from the default,
    /// 3. the default provider.
    ///
    /// An override naming an unknown provider is returned as-is and fails
    /// when its upload task resolves it.
    pub fn select_targets(&self, provider: Option<&str>, replicate_to_all: bool) -> Vec<String> {
        if self.policy.replicate_to_all || replicate_to_all {
            return self.storage.providers().into_iter().map(str::to_string).collect();
        }
        let default = self.storage.default_provider();
        match provider {
            Some(provider) if !provider.is_empty() && provider != default => vec![provider.to_string()],
            _ => vec![default.to_string()],
        }
    }

    /// Upload `request` to every target concurrently and record it.
    ///
    /// Every upload task runs to completion, even after a sibling has failed.
    ///
    /// # Errors
    /// - [`InvalidRequest`](ErrorKind::InvalidRequest) for a blank file name
    ///   or one with an empty, `.` or `..` path segment,
    /// - [`Upload`](ErrorKind::Upload) if any provider failed,
    /// - [`Persist`](ErrorKind::Persist) if every upload succeeded but the
    ///   record could not be created (for example, the logical path is taken).
    #[tracing::instrument(skip_all, fields(file_name = %request.file_name, size = request.content.len()))]
    pub async fn upload(&self, request: UploadRequest) -> Result<Arc<FileMetadata>> {
        check_file_name(&request.file_name)?;
        let targets = self.select_targets(request.provider.as_deref(), request.replicate_to_all);
        let UploadRequest { content, file_name, content_type, logical_path, tags, .. } = request;

        let id = FileId::new();
        let key = format!("{id}/{file_name}");
        let size = content.len() as u64;
        let content_type = content_type.filter(|ct| !ct.is_empty()).unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
        let logical_path = if logical_path.is_empty() { format!("/{file_name}") } else { logical_path };
        let object_metadata = Arc::new(HashMap::from([
            (CONTENT_TYPE_KEY.to_string(), content_type.clone()),
            (CHECKSUM_KEY.to_string(), blake3::hash(&content).to_hex().to_string()),
        ]));
        tracing::info!(%id, %logical_path, ?targets, "Uploading file");

        let tasks = targets.iter().map(|provider| {
            let storage = Arc::clone(&self.storage);
            let provider = provider.clone();
            let bucket = self.policy.bucket.clone();
            let key = key.clone();
            let content = content.clone();
            let metadata = Arc::clone(&object_metadata);
            let span = tracing::debug_span!("provider_upload", %provider);
            tokio::spawn(
                async move {
                    let adapter = storage.resolve(&provider)?;
                    // Each task reads through its own cursor over the shared bytes.
                    adapter.upload(&bucket, &key, Box::pin(Cursor::new(content)), size, &metadata).await
                }
                .instrument(span),
            )
        });
        let results = join_all(tasks).await;

        let mut copies = BTreeMap::new();
        let mut failures = Vec::new();
        for (provider, result) in targets.into_iter().zip(results) {
            match result {
                Ok(Ok(info)) => {
                    tracing::debug!(%provider, storage_path = %info.storage_path, "Provider upload complete");
                    copies.insert(provider, info);
                },
                Ok(Err(err)) => {
                    let kind: &StorageErrorKind = &err;
                    tracing::debug!(%provider, error = %kind, "Provider upload failed");
                    failures.push(ProviderFailure { provider, cause: FailureCause::Storage(err) });
                },
                Err(join) => {
                    tracing::debug!(%provider, error = %join, "Provider upload task failed");
                    failures.push(ProviderFailure { provider, cause: FailureCause::Join(join.to_string()) });
                },
            }
        }
        if !failures.is_empty() {
            let orphaned = self.settle_orphans(copies.into_values().collect()).await;
            exn::bail!(ErrorKind::Upload(UploadFailures { failures, orphaned }));
        }

        let mut custom_tags = HashMap::from([(ORIGINAL_FILENAME_TAG.to_string(), file_name.clone())]);
        custom_tags.extend(tags);
        let uploaded: Vec<FileInfo> = copies.values().cloned().collect();
        let meta = FileMetadata {
            id,
            file_name: display_name(&logical_path, &file_name),
            logical_path,
            size,
            content_type,
            uploaded_at: OffsetDateTime::now_utc(),
            uploaded_by: self.policy.server_id.clone(),
            cloud_copies: copies,
            custom_tags,
        };
        match self.metadata.create(meta).await {
            Ok(record) => {
                tracing::info!(%id, copies = record.cloud_copies.len(), "File uploaded");
                Ok(record)
            },
            Err(err) => {
                let orphaned = self.settle_orphans(uploaded).await;
                Err(err).or_raise(|| ErrorKind::Persist(orphaned))
            },
        }
    }

    /// Look up a record by id. Metadata store errors are returned unchanged.
    pub async fn get_file_metadata(&self, id: &FileId) -> MetadataResult<Arc<FileMetadata>> {
        self.metadata.get_by_id(id).await
    }

    /// Every record whose logical path starts with `prefix`.
    pub async fn list_files(&self, prefix: &str) -> MetadataResult<Vec<Arc<FileMetadata>>> {
        self.metadata.list_by_prefix(prefix).await
    }

    /// Deal with copies that were written for an upload that is being
    /// reported as failed, returning the ones still left in storage.
    async fn settle_orphans(&self, copies: Vec<FileInfo>) -> Vec<FileInfo> {
        let remaining = if self.policy.rollback_on_failure && !copies.is_empty() {
            let deletes = copies.into_iter().map(|copy| async move {
                let result = match self.storage.resolve(&copy.provider) {
                    Ok(adapter) => adapter.delete(&self.policy.bucket, &copy.name).await,
                    Err(err) => Err(err),
                };
                (copy, result)
            });
            let mut remaining = Vec::new();
            for (copy, result) in join_all(deletes).await {
                match result {
                    Ok(()) => tracing::info!(storage_path = %copy.storage_path, "Rolled back cloud copy"),
                    Err(err) => {
                        let kind: &StorageErrorKind = &err;
                        tracing::warn!(storage_path = %copy.storage_path, error = %kind, "Rollback delete failed");
                        remaining.push(copy);
                    },
                }
            }
            remaining
        } else {
            copies
        };
        for orphan in &remaining {
            tracing::warn!(
                provider = %orphan.provider,
                storage_path = %orphan.storage_path,
                "Orphaned cloud copy needs out-of-band cleanup"
            );
        }
        remaining
    }
}

/// The file name becomes the tail of every cloud key, so it has to be usable
/// on every provider before any upload starts: not blank, and no empty, `.`
/// or `..` path segments.
fn check_file_name(file_name: &str) -> Result<()> {
    if file_name.trim().is_empty() {
        exn::bail!(ErrorKind::InvalidRequest("file name must not be empty".to_string()));
    }
    if file_name.split('/').any(|segment| segment.is_empty() || segment == "." || segment == "..") {
        exn::bail!(ErrorKind::InvalidRequest(format!("file name {file_name:?} has an empty or relative path segment")));
    }
    Ok(())
}

/// Last segment of the logical path, falling back to the uploaded file name
/// when the path has none (e.g. `/`).
fn display_name(logical_path: &str, file_name: &str) -> String {
    logical_path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .unwrap_or(file_name)
        .to_string()
}
