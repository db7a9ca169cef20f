//! Atomic attribute files.
//!
//! Each handle buffers the whole file in memory: the first access reads the
//! current revision lazily, writes land in the buffer, and flush performs a
//! single revision-checked write. Truncation to zero is deferred: the file
//! carries a `lazily_truncated` flag that makes not-yet-read handles
//! observe an empty buffer, and the last handle to release with the flag
//! still set performs the eager empty write. This keeps the common editor
//! pattern (open, truncate, write, close) atomic and whitespace-preserving
//! under concurrent access.
//!
//! Lock order is handle state, then file state; never the reverse.

use crate::error::{EIO, ENOENT, FsResult};
use crate::node::{Ctx, FileHandle, HandleRef, Node, NodeAttr, OpenFlags, read_slice};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

/// The storage operations an atomic file is built over.
#[async_trait]
pub trait AtomicBackend: Send + Sync {
    /// Attributes plus whether the file currently exists.
    async fn get_attr(&self, ctx: &Ctx) -> FsResult<(NodeAttr, bool)>;

    /// Current bytes, revision GUID, and existence.
    async fn read(&self, ctx: &Ctx) -> FsResult<(Vec<u8>, String, bool)>;

    /// Revision-checked write; an empty revision skips the check. Returns
    /// the new revision GUID.
    async fn write(&self, ctx: &Ctx, data: Vec<u8>, revision: String) -> FsResult<String>;
}

struct FileState {
    handles: HashSet<u64>,
    next_handle: u64,
    lazily_truncated: bool,
}

struct FileInner {
    backend: Arc<dyn AtomicBackend>,
    size_limit: u64,
    state: Mutex<FileState>,
}

impl FileInner {
    fn exceeds_limit(&self, size: u64) -> bool {
        self.size_limit > 0 && size > self.size_limit
    }
}

/// A writable file node over an [`AtomicBackend`].
pub struct AtomicFile {
    inner: Arc<FileInner>,
}

impl AtomicFile {
    /// `size_limit` of zero means unlimited.
    pub fn new(backend: Arc<dyn AtomicBackend>, size_limit: u64) -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::new(FileInner {
                backend,
                size_limit,
                state: Mutex::new(FileState {
                    handles: HashSet::new(),
                    next_handle: 1,
                    lazily_truncated: false,
                }),
            }),
        })
    }

    /// Materialize a resize via read-modify-write.
    async fn resize(&self, ctx: &Ctx, new_size: u64) -> FsResult<()> {
        let (mut data, revision, _present) = self.inner.backend.read(ctx).await?;
        if (new_size as usize) < data.len() {
            data.truncate(new_size as usize);
        } else {
            data.resize(new_size as usize, 0);
        }
        if self.inner.exceeds_limit(data.len() as u64) {
            return Err(EIO);
        }
        self.inner.backend.write(ctx, data, revision).await?;
        Ok(())
    }
}

#[async_trait]
impl Node for AtomicFile {
    async fn attr(&self, ctx: &Ctx) -> FsResult<NodeAttr> {
        let (attr, _exists) = self.inner.backend.get_attr(ctx).await?;
        Ok(attr)
    }

    async fn open(&self, _ctx: &Ctx, flags: OpenFlags) -> FsResult<HandleRef> {
        let mut state = self.inner.state.lock().await;
        let id = state.next_handle;
        state.next_handle += 1;
        state.handles.insert(id);
        drop(state);

        Ok(Arc::new(AtomicHandle {
            id,
            file: self.inner.clone(),
            state: Mutex::new(HandleState {
                lazy: true,
                true_truncate: flags.truncate,
                data: Vec::new(),
                original_data: Vec::new(),
                last_revision: String::new(),
                present: false,
            }),
        }))
    }

    async fn setattr_size(&self, ctx: &Ctx, size: u64) -> FsResult<()> {
        if size > 0 {
            return self.resize(ctx, size).await;
        }

        // Truncation to zero: eager when nothing is open, lazy otherwise.
        let mut state = self.inner.state.lock().await;
        if state.handles.is_empty() {
            drop(state);
            self.inner
                .backend
                .write(ctx, Vec::new(), String::new())
                .await?;
        } else {
            state.lazily_truncated = true;
        }
        Ok(())
    }
}

struct HandleState {
    lazy: bool,
    true_truncate: bool,
    data: Vec<u8>,
    original_data: Vec<u8>,
    last_revision: String,
    present: bool,
}

/// One open handle on an atomic file.
pub struct AtomicHandle {
    id: u64,
    file: Arc<FileInner>,
    state: Mutex<HandleState>,
}

impl AtomicHandle {
    /// Perform the deferred read, if it has not happened yet. Called with
    /// the handle lock held.
    async fn ensure_read(&self, ctx: &Ctx, state: &mut HandleState) -> FsResult<()> {
        if !state.lazy {
            return Ok(());
        }

        let (data, revision, mut present) = self.file.backend.read(ctx).await?;

        let mut buffer = data.clone();
        if state.true_truncate {
            buffer.clear();
        }
        if self.file.state.lock().await.lazily_truncated {
            // A pending truncation makes this handle see a zero-length file.
            buffer.clear();
            present = true;
        }

        state.original_data = data;
        state.data = buffer;
        state.last_revision = revision;
        state.present = present;
        state.lazy = false;
        Ok(())
    }

    async fn set_lazy_truncate(&self, value: bool) {
        self.file.state.lock().await.lazily_truncated = value;
    }
}

#[async_trait]
impl FileHandle for AtomicHandle {
    async fn read(&self, ctx: &Ctx, offset: u64, size: u32) -> FsResult<Vec<u8>> {
        let mut state = self.state.lock().await;
        self.ensure_read(ctx, &mut state).await?;
        if !state.present {
            return Err(ENOENT);
        }
        Ok(read_slice(&state.data, offset, size))
    }

    async fn write(&self, ctx: &Ctx, offset: u64, data: &[u8]) -> FsResult<u32> {
        let mut state = self.state.lock().await;
        self.ensure_read(ctx, &mut state).await?;

        let write_ends_at = offset as usize + data.len();
        if self.file.exceeds_limit(write_ends_at as u64) {
            return Err(EIO);
        }

        if state.data.len() < write_ends_at {
            state.data.resize(write_ends_at, 0);
        }
        state.data[offset as usize..write_ends_at].copy_from_slice(data);
        Ok(data.len() as u32)
    }

    async fn flush(&self, ctx: &Ctx) -> FsResult<()> {
        let mut state = self.state.lock().await;
        self.ensure_read(ctx, &mut state).await?;

        if state.data.is_empty() {
            // An empty buffer becomes a truncation request that commits
            // when the last handle goes away.
            self.set_lazy_truncate(true).await;
            return Ok(());
        }

        if state.present && state.original_data == state.data {
            // No-op coalesce cancels a pending truncation.
            self.set_lazy_truncate(false).await;
            return Ok(());
        }

        if self.file.exceeds_limit(state.data.len() as u64) {
            tracing::warn!("rejecting flush: file size limit exceeded");
            return Err(EIO);
        }

        let revision = self
            .file
            .backend
            .write(ctx, state.data.clone(), state.last_revision.clone())
            .await?;

        state.last_revision = revision;
        state.original_data = state.data.clone();
        state.present = true;
        self.set_lazy_truncate(false).await;
        Ok(())
    }

    async fn release(&self, ctx: &Ctx, flush: bool) -> FsResult<()> {
        if flush {
            if let Err(err) = self.flush(ctx).await {
                tracing::warn!(error = %err, "flush on release failed; buffered data dropped");
            }
        }

        let mut state = self.file.state.lock().await;
        state.handles.remove(&self.id);
        let truncate_now = state.handles.is_empty() && state.lazily_truncated;
        if truncate_now {
            state.lazily_truncated = false;
        }
        drop(state);

        if truncate_now {
            // The deferred truncation commits now that the file is idle.
            self.file
                .backend
                .write(ctx, Vec::new(), String::new())
                .await?;
        }
        Ok(())
    }
}
