//! Logical file records and the index that owns them.
//!
//! One [`FileMetadata`] describes one logical file and every cloud copy of it.
//! Records are kept in a [`MetadataStore`], which guarantees that both the id
//! and the logical path of a record are unique among live records.

pub mod error;
mod models;
mod store;

pub use crate::models::{FileId, FileMetadata, MetadataPatch, ORIGINAL_FILENAME_TAG};
pub use crate::store::{InMemoryMetadataStore, MetadataStore};
