//! Storage models.
//!
//! These types describe a single object as seen by one cloud provider. The
//! logical, provider-independent view of a file lives in the metadata crate
//! and holds one [`FileInfo`] per replica.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use time::OffsetDateTime;

/// Metadata key carrying the object's content type.
///
/// Adapters lift this entry out of the metadata passed to
/// [`upload()`](crate::StorageAdapter::upload) and into the provider's native
/// content-type field instead of storing it as custom metadata.
pub const CONTENT_TYPE_KEY: &str = "Content-Type";
/// Content type used when none was declared.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Object metadata returned by storage adapters.
///
/// One `FileInfo` describes one cloud copy. Adapters produce them on upload,
/// list and get; nothing mutates them afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Provider-assigned object key.
    pub name: String,
    /// Object size in bytes
    pub size: u64,
    pub content_type: String,
    #[serde(with = "time::serde::rfc3339")]
    pub last_modified: OffsetDateTime,
    /// Opaque change-detection token.
    pub etag: String,
    /// Present when the bucket is versioned (S3 version id, GCS generation).
    pub version_id: Option<String>,
    /// Custom metadata as the provider reports it.
    pub custom_metadata: HashMap<String, String>,
    /// Registry name of the adapter that owns this copy.
    pub provider: String,
    /// Fully-qualified location, `scheme://bucket/key`.
    pub storage_path: String,
}

impl FileInfo {
    /// Split a caller-supplied metadata map into the content type and the
    /// remaining custom metadata.
    pub fn split_content_type(metadata: &HashMap<String, String>) -> (String, HashMap<String, String>) {
        let mut custom = metadata.clone();
        let content_type = custom
            .remove(CONTENT_TYPE_KEY)
            .filter(|ct| !ct.is_empty())
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
        (content_type, custom)
    }
}

/// Render a `scheme://bucket/key` storage path.
pub fn storage_path(scheme: &str, bucket: &str, key: &str) -> String {
    format!("{scheme}://{bucket}/{key}")
}
