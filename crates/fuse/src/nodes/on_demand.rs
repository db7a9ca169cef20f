//! Read-only files whose contents are produced per access.

use crate::error::FsResult;
use crate::node::{ByteSliceHandle, Ctx, HandleRef, Node, NodeAttr, OpenFlags};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

type ProduceFn = Box<dyn Fn(Ctx) -> BoxFuture<'static, FsResult<Vec<u8>>> + Send + Sync>;

/// A read-only file backed by an async byte producer. Attributes trigger a
/// production too, so the reported size always matches the contents.
pub struct OnDemandFile {
    produce: ProduceFn,
}

impl OnDemandFile {
    pub fn new(produce: ProduceFn) -> Arc<Self> {
        Arc::new(Self { produce })
    }

    /// A producer of string contents, normalized to one trailing newline.
    pub fn string<F, Fut>(f: F) -> Arc<Self>
    where
        F: Fn(Ctx) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FsResult<String>> + Send + 'static,
    {
        Self::new(Box::new(move |ctx| {
            let fut = f(ctx);
            Box::pin(async move {
                let s = fut.await?;
                Ok(format!("{}\n", s.trim()).into_bytes())
            })
        }))
    }
}

#[async_trait]
impl Node for OnDemandFile {
    async fn attr(&self, ctx: &Ctx) -> FsResult<NodeAttr> {
        let contents = (self.produce)(ctx.clone()).await?;
        Ok(NodeAttr::readonly_file(contents.len() as u64))
    }

    async fn open(&self, ctx: &Ctx, _flags: OpenFlags) -> FsResult<HandleRef> {
        Ok(ByteSliceHandle::new((self.produce)(ctx.clone()).await?))
    }
}
