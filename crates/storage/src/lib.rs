pub mod adapter;
pub mod error;
mod manager;
mod models;

pub use crate::adapter::StorageAdapter;
pub use crate::manager::StorageManager;
pub use crate::models::{CONTENT_TYPE_KEY, DEFAULT_CONTENT_TYPE, FileInfo, storage_path};
use std::sync::Arc;

pub type AdapterHandle = Arc<dyn StorageAdapter + Send + Sync>;
