//! The result-form selector over an entity set: `all`, `shard`, `link`,
//! `list`.

use crate::composer::FsContext;
use crate::entity_set::EntitySet;
use crate::error::{EIO, ENOENT, FsError, FsResult};
use crate::node::{Ctx, DirEntry, EntryType, NodeRef};
use crate::nodes::dyndir::{DirSource, DynamicDir, LookupResult};
use crate::nodes::link::LinkNode;
use crate::nodes::stream_file::StreamFile;
use crate::nodes::tree::Tree;
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::BTreeSet;
use std::sync::Arc;

const SHARDING_LEVELS: usize = 2;

/// Assemble the form selector directory for an entity set.
pub fn entities_node(
    fsctx: Arc<FsContext>,
    namespace: String,
    set: Arc<dyn EntitySet>,
    is_root: bool,
) -> NodeRef {
    let mut tree = Tree::new();

    tree.add(
        "all",
        DynamicDir::new(
            Arc::new(EntityListSource {
                fsctx: fsctx.clone(),
                namespace: namespace.clone(),
                set: set.clone(),
                shards: Vec::new(),
            }),
            100,
        ),
    );

    tree.add(
        "shard",
        DynamicDir::new(
            Arc::new(ShardLevelSource {
                fsctx: fsctx.clone(),
                namespace: namespace.clone(),
                set: set.clone(),
                prefix: Vec::new(),
            }),
            0,
        ),
    );

    tree.add("list", list_node(fsctx.clone(), namespace.clone(), set.clone()));

    if is_root {
        tree.add(
            "link",
            DynamicDir::new(
                Arc::new(LinkSource {
                    fsctx,
                    namespace,
                }),
                100,
            ),
        );
    }

    tree.into_node()
}

/// The member listing at a fixed shard restriction (empty for `all`).
struct EntityListSource {
    fsctx: Arc<FsContext>,
    namespace: String,
    set: Arc<dyn EntitySet>,
    shards: Vec<String>,
}

#[async_trait]
impl DirSource for EntityListSource {
    async fn list(&self, ctx: &Ctx) -> FsResult<Vec<DirEntry>> {
        let member_kind = if self.set.canonical() {
            EntryType::Dir
        } else {
            EntryType::Link
        };

        let mut entries = Vec::new();
        let mut stream = self.set.list(ctx.clone(), self.shards.clone());
        while let Some(item) = stream.next().await {
            let entity_id = item.map_err(FsError::from)?;
            if self.fsctx.has_shards(&self.shards, &entity_id) {
                entries.push(DirEntry {
                    name: entity_id,
                    kind: member_kind,
                });
            } else {
                tracing::warn!(
                    entity_id = %entity_id,
                    shards = ?self.shards,
                    "filtering out entity with non-matching shards from listing"
                );
            }
        }
        Ok(entries)
    }

    async fn get(&self, ctx: &Ctx, name: &str) -> FsResult<LookupResult> {
        if !facetfs_core::valid_filename(name) {
            return Err(ENOENT);
        }
        if !self.fsctx.has_shards(&self.shards, name) {
            return Err(ENOENT);
        }
        if !self.set.contains(ctx, name).await? {
            return Err(ENOENT);
        }

        if self.set.canonical() {
            Ok(LookupResult {
                node: self.set.node_for(ctx, name).await?,
                kind: EntryType::Dir,
                exists: true,
            })
        } else {
            Ok(LookupResult {
                node: LinkNode::target(self.fsctx.abs_canonical_path(&self.namespace, name)),
                kind: EntryType::Link,
                exists: true,
            })
        }
    }
}

/// A level of the two-level shard fan-out. Listing derives the observed
/// next-level shards from the restricted member list.
struct ShardLevelSource {
    fsctx: Arc<FsContext>,
    namespace: String,
    set: Arc<dyn EntitySet>,
    prefix: Vec<String>,
}

#[async_trait]
impl DirSource for ShardLevelSource {
    async fn list(&self, ctx: &Ctx) -> FsResult<Vec<DirEntry>> {
        let mut observed = BTreeSet::new();

        let mut stream = self.set.list(ctx.clone(), self.prefix.clone());
        while let Some(item) = stream.next().await {
            let entity_id = item.map_err(FsError::from)?;
            if !self.fsctx.has_shards(&self.prefix, &entity_id) {
                continue;
            }
            let shards = self.fsctx.shards_of(&entity_id);
            if let Some(next) = shards.get(self.prefix.len()) {
                observed.insert(next.clone());
            }
        }

        Ok(observed
            .into_iter()
            .map(|name| DirEntry {
                name,
                kind: EntryType::Dir,
            })
            .collect())
    }

    async fn get(&self, _ctx: &Ctx, name: &str) -> FsResult<LookupResult> {
        let mut prefix = self.prefix.clone();
        prefix.push(name.to_string());

        let node = if prefix.len() == SHARDING_LEVELS {
            DynamicDir::new(
                Arc::new(EntityListSource {
                    fsctx: self.fsctx.clone(),
                    namespace: self.namespace.clone(),
                    set: self.set.clone(),
                    shards: prefix,
                }),
                0,
            ) as NodeRef
        } else {
            DynamicDir::new(
                Arc::new(ShardLevelSource {
                    fsctx: self.fsctx.clone(),
                    namespace: self.namespace.clone(),
                    set: self.set.clone(),
                    prefix,
                }),
                0,
            ) as NodeRef
        };

        Ok(LookupResult {
            node,
            kind: EntryType::Dir,
            exists: true,
        })
    }
}

/// The `link` form: always lists empty, resolves any entity ID to a
/// symlink at its canonical shard path.
struct LinkSource {
    fsctx: Arc<FsContext>,
    namespace: String,
}

#[async_trait]
impl DirSource for LinkSource {
    async fn list(&self, _ctx: &Ctx) -> FsResult<Vec<DirEntry>> {
        Ok(Vec::new())
    }

    async fn get(&self, _ctx: &Ctx, name: &str) -> FsResult<LookupResult> {
        Ok(LookupResult {
            node: LinkNode::target(self.fsctx.abs_canonical_path(&self.namespace, name)),
            kind: EntryType::Link,
            exists: true,
        })
    }
}

/// The `list` form: a streaming text file of absolute canonical shard
/// paths, one per member, newline-terminated.
fn list_node(fsctx: Arc<FsContext>, namespace: String, set: Arc<dyn EntitySet>) -> NodeRef {
    StreamFile::new(Box::new(move |ctx, tx| {
        let fsctx = fsctx.clone();
        let namespace = namespace.clone();
        let set = set.clone();
        Box::pin(async move {
            let mut stream = set.list(ctx, Vec::new());
            while let Some(item) = stream.next().await {
                let entity_id = item.map_err(FsError::from)?;
                let line = format!("{}\n", fsctx.abs_canonical_path(&namespace, &entity_id));
                if tx.send(line.into_bytes()).await.is_err() {
                    // Reader went away.
                    return Err(EIO);
                }
            }
            Ok(())
        })
    }))
}
