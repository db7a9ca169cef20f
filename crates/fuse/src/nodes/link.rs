//! Symlink nodes.

use crate::error::FsResult;
use crate::node::{Ctx, EntryType, Node, NodeAttr};
use async_trait::async_trait;
use std::sync::Arc;

/// A symlink with a fixed target.
pub struct LinkNode {
    target: String,
}

impl LinkNode {
    pub fn target(target: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            target: target.into(),
        })
    }
}

#[async_trait]
impl Node for LinkNode {
    fn entry_type(&self) -> EntryType {
        EntryType::Link
    }

    async fn attr(&self, _ctx: &Ctx) -> FsResult<NodeAttr> {
        Ok(NodeAttr::symlink())
    }

    async fn readlink(&self, _ctx: &Ctx) -> FsResult<String> {
        Ok(self.target.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reports_target_and_symlink_mode() {
        let node = LinkNode::target("/mnt/entities/shard/ab/cd/e");
        assert_eq!(
            node.readlink(&Ctx::new()).await.unwrap(),
            "/mnt/entities/shard/ab/cd/e"
        );
        assert_eq!(node.attr(&Ctx::new()).await.unwrap().kind, EntryType::Link);
    }
}
