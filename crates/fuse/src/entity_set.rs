//! Entity result sets.
//!
//! The four result forms (`all`, `shard`, `link`, `list`) are assembled
//! over an [`EntitySet`]: the full namespace listing (whose members are
//! canonical entity directories) or a query's result set (whose members
//! are symlinks to the canonical shard paths).

use crate::composer::FsContext;
use crate::error::{EIO, FsResult};
use crate::node::{Ctx, NodeRef};
use async_trait::async_trait;
use facetfs_core::EntityQuery;
use facetfs_metadata::{EntityStream, QueryKind};
use futures::StreamExt;
use std::sync::Arc;

/// A set of entities that can be listed, membership-checked, and (for
/// canonical sets) resolved to entity directory nodes.
#[async_trait]
pub trait EntitySet: Send + Sync {
    /// Whether members are canonical entity directories (as opposed to
    /// symlinks into the canonical shard tree).
    fn canonical(&self) -> bool;

    /// Stream member entity IDs, optionally restricted to a shard prefix.
    fn list(&self, ctx: Ctx, shards: Vec<String>) -> EntityStream;

    /// Whether a specific entity belongs to the set.
    async fn contains(&self, _ctx: &Ctx, _entity_id: &str) -> FsResult<bool> {
        Ok(true)
    }

    /// The canonical node for a member. Only called when `canonical()`.
    async fn node_for(&self, _ctx: &Ctx, _entity_id: &str) -> FsResult<NodeRef> {
        Err(EIO)
    }
}

/// Every entity in a namespace.
pub struct AllEntities {
    pub fsctx: Arc<FsContext>,
    pub namespace: String,
}

#[async_trait]
impl EntitySet for AllEntities {
    fn canonical(&self) -> bool {
        true
    }

    fn list(&self, ctx: Ctx, shards: Vec<String>) -> EntityStream {
        let kind = if shards.is_empty() {
            QueryKind::All
        } else {
            QueryKind::Parsed(EntityQuery::default().with_shards(&shards))
        };
        self.fsctx
            .service
            .query_entities(ctx, self.namespace.clone(), kind)
    }

    async fn node_for(&self, _ctx: &Ctx, entity_id: &str) -> FsResult<NodeRef> {
        Ok(self
            .fsctx
            .entity_root_node(self.namespace.clone(), entity_id.to_string()))
    }
}

/// The result set of one opened query instance.
pub struct QueryEntities {
    pub fsctx: Arc<FsContext>,
    pub namespace: String,
    pub query: EntityQuery,
    pub query_id: i64,
}

#[async_trait]
impl EntitySet for QueryEntities {
    fn canonical(&self) -> bool {
        false
    }

    fn list(&self, ctx: Ctx, shards: Vec<String>) -> EntityStream {
        let restricted = self.query.with_shards(&shards);
        let stream = self.fsctx.service.query_entities(
            ctx,
            self.namespace.clone(),
            QueryKind::Parsed(restricted),
        );

        // Membership observed while streaming feeds later lookups.
        let caches = self.fsctx.caches.clone();
        let namespace = self.namespace.clone();
        let query_id = self.query_id;
        Box::pin(stream.inspect(move |item| {
            if let Ok(entity_id) = item {
                caches.record_query_member(crate::cache::QueryKey {
                    namespace: namespace.clone(),
                    query_id,
                    entity_id: entity_id.clone(),
                });
            }
        }))
    }

    async fn contains(&self, ctx: &Ctx, entity_id: &str) -> FsResult<bool> {
        let key = crate::cache::QueryKey {
            namespace: self.namespace.clone(),
            query_id: self.query_id,
            entity_id: entity_id.to_string(),
        };
        if self.fsctx.caches.query_member(&key) {
            return Ok(true);
        }

        tracing::warn!(
            namespace = %self.namespace,
            query_id = self.query_id,
            entity_id = %entity_id,
            "entity not in query membership cache; verifying"
        );

        // Re-run the query restricted to this entity and require exactly
        // one result.
        let verify = self.query.with_entity_id(entity_id);
        let mut stream = self.fsctx.service.query_entities(
            ctx.clone(),
            self.namespace.clone(),
            QueryKind::Parsed(verify),
        );

        let mut rows = 0u64;
        while let Some(item) = stream.next().await {
            item?;
            rows += 1;
            if rows > 1 {
                tracing::error!(
                    namespace = %self.namespace,
                    query_id = self.query_id,
                    entity_id = %entity_id,
                    "verification query returned more than one entry"
                );
                return Err(EIO);
            }
        }

        Ok(rows == 1)
    }
}
