//! Multi-provider upload.
//!
//! A [`Replicator`] sends one file to every targeted provider at once and only
//! records it once all of them have stored their copy. Failed uploads never
//! leave a record behind; copies that landed anyway are reported as orphans.

pub mod error;
mod engine;
mod request;

pub use crate::engine::{CHECKSUM_KEY, Replicator};
pub use crate::request::{ReplicationPolicy, UploadRequest};
