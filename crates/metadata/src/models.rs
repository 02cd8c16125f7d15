use derive_more::Display;
use serde::{Deserialize, Serialize};
use skyvault_storage::FileInfo;
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

/// Tag recording the name the file was uploaded under.
pub const ORIGINAL_FILENAME_TAG: &str = "original_filename";

/// Unique identifier of a logical file.
///
/// Also used as the first segment of every cloud key written for the file,
/// so a stray object can always be traced back to its record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, Serialize, Deserialize)]
#[display("{_0}")]
#[serde(transparent)]
pub struct FileId(Uuid);

impl FileId {
    /// Generate a new random (v4) identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}
impl Default for FileId {
    fn default() -> Self {
        Self::new()
    }
}
impl From<Uuid> for FileId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}
impl FromStr for FileId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// A logical file and every cloud copy of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub id: FileId,
    /// Caller-facing location, unique across the store
    /// (e.g. `/users/alice/documents/report.pdf`).
    pub logical_path: String,
    pub file_name: String,
    /// Size of the uploaded content in bytes.
    pub size: u64,
    pub content_type: String,
    #[serde(with = "time::serde::rfc3339")]
    pub uploaded_at: OffsetDateTime,
    /// Identity of the server that performed the upload.
    pub uploaded_by: String,
    /// Provider name -> the copy stored there.
    pub cloud_copies: BTreeMap<String, FileInfo>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub custom_tags: HashMap<String, String>,
}

impl FileMetadata {
    /// Apply every field set in `patch`. Uniqueness of the logical path is the
    /// store's concern and is checked before this is called.
    pub(crate) fn apply(&mut self, patch: MetadataPatch) {
        let MetadataPatch { logical_path, file_name, content_type, custom_tags, cloud_copies } = patch;
        if let Some(logical_path) = logical_path {
            self.logical_path = logical_path;
        }
        if let Some(file_name) = file_name {
            self.file_name = file_name;
        }
        if let Some(content_type) = content_type {
            self.content_type = content_type;
        }
        if let Some(custom_tags) = custom_tags {
            self.custom_tags = custom_tags;
        }
        if let Some(cloud_copies) = cloud_copies {
            self.cloud_copies = cloud_copies;
        }
    }
}

/// Sparse update of a [`FileMetadata`] record.
///
/// Fields left as `None` are untouched. Map fields replace the stored map
/// wholesale rather than merging into it.
///
/// ```
/// use skyvault_metadata::MetadataPatch;
///
/// let patch = MetadataPatch::default().logical_path("/archive/report.pdf").file_name("report.pdf");
/// assert!(patch.content_type.is_none());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataPatch {
    pub logical_path: Option<String>,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub custom_tags: Option<HashMap<String, String>>,
    pub cloud_copies: Option<BTreeMap<String, FileInfo>>,
}

impl MetadataPatch {
    pub fn logical_path(mut self, logical_path: impl Into<String>) -> Self {
        self.logical_path = Some(logical_path.into());
        self
    }

    pub fn file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn custom_tags(mut self, custom_tags: HashMap<String, String>) -> Self {
        self.custom_tags = Some(custom_tags);
        self
    }

    pub fn cloud_copies(mut self, cloud_copies: BTreeMap<String, FileInfo>) -> Self {
        self.cloud_copies = Some(cloud_copies);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
