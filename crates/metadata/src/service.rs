//! The storage service boundary consumed by the filesystem layer.

use crate::error::MetadataResult;
use crate::models::{
    DatabaseMetadata, DeleteRequest, EntityFile, FileHeader, WriteRequest,
};
use async_trait::async_trait;
use facetfs_core::query::EntityQuery;
use futures::Stream;
use std::collections::BTreeMap;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

/// A boxed stream of matching entity IDs.
pub type EntityStream = Pin<Box<dyn Stream<Item = MetadataResult<String>> + Send>>;

/// The entity query variants the engine executes.
#[derive(Clone, Debug)]
pub enum QueryKind {
    /// Every entity in the namespace.
    All,
    /// Entities with an active row at this filename.
    HasFilename(String),
    /// A parsed clause query, compiled dynamically.
    Parsed(EntityQuery),
}

/// The metadata service interface.
///
/// This is the function-call boundary between the filesystem process and
/// the storage engine; all operations accept a cancellation token threaded
/// from the originating kernel request.
#[async_trait]
pub trait MetadataService: Send + Sync {
    /// Write a file or directory row, appending a new revision.
    async fn write_file(
        &self,
        cancel: &CancellationToken,
        req: WriteRequest,
    ) -> MetadataResult<FileHeader>;

    /// Record a tombstone for a file or directory.
    async fn delete_file(
        &self,
        cancel: &CancellationToken,
        req: DeleteRequest,
    ) -> MetadataResult<FileHeader>;

    /// Read the active revision at `(namespace, entity_id, filename)`.
    async fn read_file(
        &self,
        cancel: &CancellationToken,
        namespace: &str,
        entity_id: &str,
        filename: &str,
    ) -> MetadataResult<EntityFile>;

    /// All active file headers under an entity, keyed by filename.
    /// NotFound if the entity has no active rows.
    async fn get_entity(
        &self,
        cancel: &CancellationToken,
        namespace: &str,
        entity_id: &str,
    ) -> MetadataResult<BTreeMap<String, FileHeader>>;

    /// Distinct namespaces with at least one active row.
    async fn list_namespaces(&self, cancel: &CancellationToken) -> MetadataResult<Vec<String>>;

    /// Aggregate database metadata; totals and the sharding key are skipped
    /// when `only_timestamps` is set.
    async fn database_metadata(
        &self,
        cancel: &CancellationToken,
        only_timestamps: bool,
    ) -> MetadataResult<DatabaseMetadata>;

    /// Stream the entity IDs matching a query, in entity-ID order. The
    /// cancellation token is checked between rows.
    fn query_entities(
        &self,
        cancel: CancellationToken,
        namespace: String,
        kind: QueryKind,
    ) -> EntityStream;
}
