//! Dynamic directories backed by a listing/lookup source.

use crate::error::{EIO, ENOENT, FsResult};
use crate::node::{Ctx, DirEntry, EntryType, HandleRef, Node, NodeAttr, NodeRef, OpenFlags};
use async_trait::async_trait;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

/// Result of resolving one name in a dynamic directory.
///
/// `exists` distinguishes lookup (which must fail with ENOENT on a missing
/// name) from create (which opens the returned node regardless, so a write
/// can bring the file into existence).
#[derive(Clone)]
pub struct LookupResult {
    pub node: NodeRef,
    pub kind: EntryType,
    pub exists: bool,
}

/// The source behind a dynamic directory.
#[async_trait]
pub trait DirSource: Send + Sync {
    async fn list(&self, ctx: &Ctx) -> FsResult<Vec<DirEntry>>;

    async fn get(&self, ctx: &Ctx, name: &str) -> FsResult<LookupResult>;

    async fn create_dir(&self, _ctx: &Ctx, _name: &str) -> FsResult<()> {
        Err(EIO)
    }

    async fn delete(&self, _ctx: &Ctx, _name: &str, _is_dir: bool) -> FsResult<()> {
        Err(EIO)
    }
}

/// A directory whose children are resolved through a [`DirSource`], with an
/// optional LRU cache of resolved nodes. Absences and errors are never
/// cached.
pub struct DynamicDir {
    source: Arc<dyn DirSource>,
    cache: Option<Mutex<LruCache<String, LookupResult>>>,
}

impl DynamicDir {
    pub fn new(source: Arc<dyn DirSource>, cache_size: usize) -> Arc<Self> {
        let cache = NonZeroUsize::new(cache_size).map(|cap| Mutex::new(LruCache::new(cap)));
        Arc::new(Self { source, cache })
    }

    async fn get_maybe_cached(&self, ctx: &Ctx, name: &str) -> FsResult<LookupResult> {
        let Some(cache) = &self.cache else {
            return self.source.get(ctx, name).await;
        };

        if let Some(found) = cache.lock().expect("node cache lock").get(name) {
            return Ok(found.clone());
        }

        let resolved = self.source.get(ctx, name).await?;
        if resolved.exists {
            cache
                .lock()
                .expect("node cache lock")
                .put(name.to_string(), resolved.clone());
        }
        Ok(resolved)
    }
}

#[async_trait]
impl Node for DynamicDir {
    fn entry_type(&self) -> EntryType {
        EntryType::Dir
    }

    async fn attr(&self, _ctx: &Ctx) -> FsResult<NodeAttr> {
        Ok(NodeAttr::dir())
    }

    async fn lookup(&self, ctx: &Ctx, name: &str) -> FsResult<NodeRef> {
        let resolved = self.get_maybe_cached(ctx, name).await?;
        if !resolved.exists {
            return Err(ENOENT);
        }
        Ok(resolved.node)
    }

    async fn read_dir_all(&self, ctx: &Ctx) -> FsResult<Vec<DirEntry>> {
        self.source.list(ctx).await
    }

    async fn create(&self, ctx: &Ctx, name: &str, flags: OpenFlags) -> FsResult<(NodeRef, HandleRef)> {
        // Open even a not-yet-existing node: the subsequent write-and-flush
        // brings it into existence.
        let resolved = self.get_maybe_cached(ctx, name).await?;
        let handle = resolved.node.open(ctx, flags).await?;
        Ok((resolved.node, handle))
    }

    async fn mkdir(&self, ctx: &Ctx, name: &str) -> FsResult<NodeRef> {
        self.source.create_dir(ctx, name).await?;
        let resolved = self.source.get(ctx, name).await?;
        Ok(resolved.node)
    }

    async fn remove(&self, ctx: &Ctx, name: &str, is_dir: bool) -> FsResult<()> {
        self.source.delete(ctx, name, is_dir).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::FileHandle;
    use crate::nodes::static_file::StaticFile;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        gets: AtomicUsize,
        exists: bool,
    }

    #[async_trait]
    impl DirSource for CountingSource {
        async fn list(&self, _ctx: &Ctx) -> FsResult<Vec<DirEntry>> {
            Ok(vec![DirEntry {
                name: "child".into(),
                kind: EntryType::File,
            }])
        }

        async fn get(&self, _ctx: &Ctx, name: &str) -> FsResult<LookupResult> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            if name != "child" {
                return Err(ENOENT);
            }
            Ok(LookupResult {
                node: StaticFile::string("hello"),
                kind: EntryType::File,
                exists: self.exists,
            })
        }
    }

    #[tokio::test]
    async fn caches_successful_lookups() {
        let source = Arc::new(CountingSource {
            gets: AtomicUsize::new(0),
            exists: true,
        });
        let dir = DynamicDir::new(source.clone(), 10);

        let ctx = Ctx::new();
        dir.lookup(&ctx, "child").await.unwrap();
        dir.lookup(&ctx, "child").await.unwrap();
        assert_eq!(source.gets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn does_not_cache_nonexistent_entries() {
        let source = Arc::new(CountingSource {
            gets: AtomicUsize::new(0),
            exists: false,
        });
        let dir = DynamicDir::new(source.clone(), 10);

        let ctx = Ctx::new();
        assert_eq!(dir.lookup(&ctx, "child").await.unwrap_err(), ENOENT);
        assert_eq!(dir.lookup(&ctx, "child").await.unwrap_err(), ENOENT);
        assert_eq!(source.gets.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn zero_cache_size_disables_caching() {
        let source = Arc::new(CountingSource {
            gets: AtomicUsize::new(0),
            exists: true,
        });
        let dir = DynamicDir::new(source.clone(), 0);

        let ctx = Ctx::new();
        dir.lookup(&ctx, "child").await.unwrap();
        dir.lookup(&ctx, "child").await.unwrap();
        assert_eq!(source.gets.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn create_opens_nonexistent_node() {
        let source = Arc::new(CountingSource {
            gets: AtomicUsize::new(0),
            exists: false,
        });
        let dir = DynamicDir::new(source, 10);

        let ctx = Ctx::new();
        let (_node, handle) = dir
            .create(&ctx, "child", OpenFlags::default())
            .await
            .unwrap();
        assert_eq!(handle.read(&ctx, 0, 100).await.unwrap(), b"hello\n");
    }

    #[tokio::test]
    async fn unsupported_mutations_are_eio() {
        let source = Arc::new(CountingSource {
            gets: AtomicUsize::new(0),
            exists: true,
        });
        let dir = DynamicDir::new(source, 0);
        let ctx = Ctx::new();
        assert_eq!(dir.mkdir(&ctx, "x").await.unwrap_err(), EIO);
        assert_eq!(dir.remove(&ctx, "x", false).await.unwrap_err(), EIO);
    }
}
