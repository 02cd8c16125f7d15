//! Metadata store trait and the in-memory implementation.

use crate::error::{ErrorKind, Lookup, Result};
use crate::models::{FileId, FileMetadata, MetadataPatch};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Index of logical files.
///
/// Every live record is addressable both by [`FileId`] and by logical path,
/// and neither may be shared by two live records. Records are handed out as
/// shared, immutable snapshots; an [`update()`](Self::update) replaces the
/// snapshot rather than mutating it.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert a new record.
    ///
    /// # Errors
    /// [`AlreadyExists`](ErrorKind::AlreadyExists) if the id or the logical
    /// path is already taken; the store is left unchanged.
    async fn create(&self, meta: FileMetadata) -> Result<Arc<FileMetadata>>;

    async fn get_by_id(&self, id: &FileId) -> Result<Arc<FileMetadata>>;

    async fn get_by_path(&self, logical_path: &str) -> Result<Arc<FileMetadata>>;

    /// Every record whose logical path starts with `prefix`, in no particular
    /// order. The empty prefix matches every record.
    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<Arc<FileMetadata>>>;

    /// Apply `patch` to the record and return the new snapshot.
    ///
    /// A logical path change is validated before anything is applied, so a
    /// failed update leaves the record untouched.
    ///
    /// # Errors
    /// - [`NotFound`](ErrorKind::NotFound) if no record has this id,
    /// - [`AlreadyExists`](ErrorKind::AlreadyExists) if the new logical path
    ///   belongs to a different record.
    async fn update(&self, id: &FileId, patch: MetadataPatch) -> Result<Arc<FileMetadata>>;

    /// Remove the record, releasing its logical path for reuse.
    async fn delete(&self, id: &FileId) -> Result<()>;
}

#[derive(Debug, Default)]
struct Index {
    records: HashMap<FileId, Arc<FileMetadata>>,
    paths: HashMap<String, FileId>,
}

/// [`MetadataStore`] held entirely in process memory.
///
/// Both indexes sit behind a single [`RwLock`]: lookups run concurrently,
/// any mutation excludes everything else, and the lock is never held across
/// an `.await`. Contents are lost when the store is dropped.
///
/// # Examples
///
/// ```
/// use skyvault_metadata::{InMemoryMetadataStore, MetadataStore};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let store = InMemoryMetadataStore::new();
/// assert!(store.list_by_prefix("").await.unwrap().is_empty());
/// assert!(store.get_by_path("/nope").await.is_err());
/// # }
/// ```
#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    index: RwLock<Index>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Every mutation validates before it writes, so a panic can never leave
    // the two indexes disagreeing and a poisoned lock is safe to reuse.
    fn read(&self) -> RwLockReadGuard<'_, Index> {
        self.index.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Index> {
        self.index.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn create(&self, meta: FileMetadata) -> Result<Arc<FileMetadata>> {
        let mut index = self.write();
        if index.records.contains_key(&meta.id) {
            exn::bail!(ErrorKind::AlreadyExists(Lookup::Id(meta.id)));
        }
        if index.paths.contains_key(&meta.logical_path) {
            exn::bail!(ErrorKind::AlreadyExists(Lookup::Path(meta.logical_path)));
        }
        let meta = Arc::new(meta);
        index.paths.insert(meta.logical_path.clone(), meta.id);
        index.records.insert(meta.id, Arc::clone(&meta));
        tracing::debug!(id = %meta.id, logical_path = %meta.logical_path, "Created file metadata");
        Ok(meta)
    }

    async fn get_by_id(&self, id: &FileId) -> Result<Arc<FileMetadata>> {
        match self.read().records.get(id) {
            Some(meta) => Ok(Arc::clone(meta)),
            None => exn::bail!(ErrorKind::NotFound(Lookup::Id(*id))),
        }
    }

    async fn get_by_path(&self, logical_path: &str) -> Result<Arc<FileMetadata>> {
        let index = self.read();
        match index.paths.get(logical_path).and_then(|id| index.records.get(id)) {
            Some(meta) => Ok(Arc::clone(meta)),
            None => exn::bail!(ErrorKind::NotFound(Lookup::Path(logical_path.to_string()))),
        }
    }

    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<Arc<FileMetadata>>> {
        Ok(self
            .read()
            .records
            .values()
            .filter(|meta| meta.logical_path.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn update(&self, id: &FileId, patch: MetadataPatch) -> Result<Arc<FileMetadata>> {
        let mut index = self.write();
        let Some(current) = index.records.get(id) else {
            exn::bail!(ErrorKind::NotFound(Lookup::Id(*id)));
        };
        let old_path = current.logical_path.clone();
        if let Some(new_path) = &patch.logical_path
            && let Some(owner) = index.paths.get(new_path)
            && owner != id
        {
            exn::bail!(ErrorKind::AlreadyExists(Lookup::Path(new_path.clone())));
        }

        let mut updated = FileMetadata::clone(current);
        updated.apply(patch);
        let updated = Arc::new(updated);
        if updated.logical_path != old_path {
            index.paths.remove(&old_path);
            index.paths.insert(updated.logical_path.clone(), *id);
        }
        index.records.insert(*id, Arc::clone(&updated));
        Ok(updated)
    }

    async fn delete(&self, id: &FileId) -> Result<()> {
        let mut index = self.write();
        let Some(meta) = index.records.remove(id) else {
            exn::bail!(ErrorKind::NotFound(Lookup::Id(*id)));
        };
        index.paths.remove(&meta.logical_path);
        tracing::debug!(%id, logical_path = %meta.logical_path, "Deleted file metadata");
        Ok(())
    }
}
