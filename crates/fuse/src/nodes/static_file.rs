//! Fixed-contents read-only files.

use crate::error::FsResult;
use crate::node::{ByteSliceHandle, Ctx, HandleRef, Node, NodeAttr, OpenFlags};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

/// A read-only file with contents fixed at construction.
pub struct StaticFile {
    contents: Vec<u8>,
}

impl StaticFile {
    pub fn bytes(contents: impl Into<Vec<u8>>) -> Arc<Self> {
        Arc::new(Self {
            contents: contents.into(),
        })
    }

    /// String contents, normalized to one trailing newline.
    pub fn string(s: impl AsRef<str>) -> Arc<Self> {
        Self::bytes(format!("{}\n", s.as_ref().trim()).into_bytes())
    }

    /// Pretty-printed JSON contents.
    pub fn json<T: Serialize>(value: &T) -> Result<Arc<Self>, serde_json::Error> {
        Ok(Self::string(serde_json::to_string_pretty(value)?))
    }
}

#[async_trait]
impl Node for StaticFile {
    async fn attr(&self, _ctx: &Ctx) -> FsResult<NodeAttr> {
        Ok(NodeAttr::readonly_file(self.contents.len() as u64))
    }

    async fn open(&self, _ctx: &Ctx, _flags: OpenFlags) -> FsResult<HandleRef> {
        Ok(ByteSliceHandle::new(self.contents.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::FileHandle;

    #[tokio::test]
    async fn string_normalizes_trailing_newline() {
        let node = StaticFile::string("  value  ");
        let handle = node.open(&Ctx::new(), OpenFlags::default()).await.unwrap();
        assert_eq!(handle.read(&Ctx::new(), 0, 100).await.unwrap(), b"value\n");
    }

    #[tokio::test]
    async fn attr_reports_size_and_readonly_mode() {
        let node = StaticFile::bytes(b"abc".to_vec());
        let attr = node.attr(&Ctx::new()).await.unwrap();
        assert_eq!(attr.size, 3);
        assert_eq!(attr.perm, 0o444);
    }
}
