use bytes::Bytes;
use skyvault_config::Config;
use std::collections::HashMap;

/// One file to upload, with everything the caller decided about it.
///
/// ```
/// use skyvault_replicate::UploadRequest;
///
/// let request = UploadRequest::new("report.pdf", b"%PDF-1.7".to_vec())
///     .logical_path("/users/alice/report.pdf")
///     .content_type("application/pdf")
///     .tag("department", "finance");
/// assert_eq!(request.size(), 8);
/// ```
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// File content, held once and shared by every upload task.
    pub content: Bytes,
    /// Name the file was uploaded under; becomes the last segment of every
    /// cloud key.
    pub file_name: String,
    /// Declared content type. `None` (or empty) means
    /// [`DEFAULT_CONTENT_TYPE`](skyvault_storage::DEFAULT_CONTENT_TYPE).
    pub content_type: Option<String>,
    /// Logical path to record the file under. Empty means `/<file_name>`.
    pub logical_path: String,
    /// Send the file to this provider instead of the default.
    pub provider: Option<String>,
    /// Replicate to every provider even if the configuration does not.
    pub replicate_to_all: bool,
    /// Caller tags, merged over the tags the engine adds.
    pub tags: HashMap<String, String>,
}

impl UploadRequest {
    pub fn new(file_name: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            content: content.into(),
            file_name: file_name.into(),
            content_type: None,
            logical_path: String::new(),
            provider: None,
            replicate_to_all: false,
            tags: HashMap::new(),
        }
    }

    pub fn logical_path(mut self, logical_path: impl Into<String>) -> Self {
        self.logical_path = logical_path.into();
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn replicate_to_all(mut self, replicate_to_all: bool) -> Self {
        self.replicate_to_all = replicate_to_all;
        self
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }
}

/// Process-wide replication settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationPolicy {
    /// Bucket every provider writes into.
    pub bucket: String,
    /// Recorded as `uploaded_by`.
    pub server_id: String,
    pub replicate_to_all: bool,
    /// Delete the copies that succeeded when the upload as a whole fails.
    pub rollback_on_failure: bool,
}

impl ReplicationPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            bucket: config.bucket.clone(),
            server_id: config.server_id.clone(),
            replicate_to_all: config.storage.replicate_to_all,
            rollback_on_failure: config.storage.rollback_on_failure,
        }
    }
}
