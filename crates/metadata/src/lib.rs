//! SQLite-backed versioned row store for facetfs.
//!
//! This crate is the storage engine: an append-only, revision-tracked row
//! model over SQLite. Every write appends a new row and deactivates its
//! predecessor in one serializable transaction; deletions are tombstone
//! rows; file bytes are stored partitioned into whitespace prefix, trimmed
//! body and whitespace suffix so content queries can index the trimmed
//! body directly.

pub mod dynquery;
pub mod error;
pub mod models;
pub mod schema;
pub mod service;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use models::{
    DatabaseMetadata, DeleteRequest, DeletionType, EntityFile, FileHeader, WriteRequest,
};
pub use service::{EntityStream, MetadataService, QueryKind};
pub use store::{ChangeHook, SqliteStore, StoreOptions};
