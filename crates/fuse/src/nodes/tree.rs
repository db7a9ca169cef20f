//! Static name → node directory maps.

use crate::error::FsResult;
use crate::node::{Ctx, DirEntry, EntryType, Node, NodeAttr, NodeRef};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A directory with a fixed set of children.
#[derive(Default)]
pub struct Tree {
    entries: BTreeMap<String, NodeRef>,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, node: NodeRef) {
        self.entries.insert(name.into(), node);
    }

    pub fn into_node(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[async_trait]
impl Node for Tree {
    fn entry_type(&self) -> EntryType {
        EntryType::Dir
    }

    async fn attr(&self, _ctx: &Ctx) -> FsResult<NodeAttr> {
        Ok(NodeAttr::dir())
    }

    async fn lookup(&self, _ctx: &Ctx, name: &str) -> FsResult<NodeRef> {
        self.entries.get(name).cloned().ok_or(crate::error::ENOENT)
    }

    async fn read_dir_all(&self, _ctx: &Ctx) -> FsResult<Vec<DirEntry>> {
        Ok(self
            .entries
            .iter()
            .map(|(name, node)| DirEntry {
                name: name.clone(),
                kind: node.entry_type(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::static_file::StaticFile;

    #[tokio::test]
    async fn lists_and_looks_up_children() {
        let mut tree = Tree::new();
        tree.add("pid", StaticFile::string("42"));
        let mut inner = Tree::new();
        inner.add("heap_bytes", StaticFile::string("0"));
        tree.add("stats", inner.into_node());
        let tree = tree.into_node();

        let ctx = Ctx::new();
        let entries = tree.read_dir_all(&ctx).await.unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["pid", "stats"]);
        assert_eq!(entries[1].kind, EntryType::Dir);

        tree.lookup(&ctx, "pid").await.unwrap();
        assert!(tree.lookup(&ctx, "absent").await.is_err());
    }
}
