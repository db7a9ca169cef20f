//! The node capability interface.
//!
//! Filesystem nodes are trait objects polymorphic over a small capability
//! set; unsupported operations default to EIO (or ENOENT for lookups on
//! non-directories). The FUSE adapter is the only consumer.

use crate::error::{EIO, ENOENT, FsResult};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Per-request cancellation context, threaded from the kernel request into
/// every storage call.
pub type Ctx = CancellationToken;

/// Directory entry type, as reported to readdir.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryType {
    File,
    Dir,
    Link,
}

/// Node attributes. Sizes are in bytes; permissions are fixed mode bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodeAttr {
    pub kind: EntryType,
    pub perm: u16,
    pub size: u64,
}

impl NodeAttr {
    pub fn dir() -> Self {
        Self {
            kind: EntryType::Dir,
            perm: 0o755,
            size: 0,
        }
    }

    pub fn readonly_file(size: u64) -> Self {
        Self {
            kind: EntryType::File,
            perm: 0o444,
            size,
        }
    }

    pub fn attribute_file(size: u64) -> Self {
        Self {
            kind: EntryType::File,
            perm: 0o660,
            size,
        }
    }

    pub fn symlink() -> Self {
        Self {
            kind: EntryType::Link,
            perm: 0o444,
            size: 0,
        }
    }
}

/// Open flags the node layer cares about.
#[derive(Clone, Copy, Debug, Default)]
pub struct OpenFlags {
    pub truncate: bool,
    pub write: bool,
}

impl OpenFlags {
    pub fn from_libc(flags: i32) -> Self {
        let access = flags & libc::O_ACCMODE;
        Self {
            truncate: flags & libc::O_TRUNC != 0,
            write: access == libc::O_WRONLY || access == libc::O_RDWR,
        }
    }
}

/// Flags returned to the kernel on open.
#[derive(Clone, Copy, Debug, Default)]
pub struct HandleFlags {
    pub direct_io: bool,
    pub nonseekable: bool,
}

/// One readdir entry.
#[derive(Clone, Debug)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryType,
}

pub type NodeRef = Arc<dyn Node>;
pub type HandleRef = Arc<dyn FileHandle>;

impl std::fmt::Debug for dyn Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("entry_type", &self.entry_type())
            .finish()
    }
}

/// A filesystem node.
#[async_trait]
pub trait Node: Send + Sync {
    /// The dirent type this node reports when listed by a parent.
    fn entry_type(&self) -> EntryType {
        EntryType::File
    }

    async fn attr(&self, ctx: &Ctx) -> FsResult<NodeAttr>;

    async fn lookup(&self, _ctx: &Ctx, _name: &str) -> FsResult<NodeRef> {
        Err(ENOENT)
    }

    async fn read_dir_all(&self, _ctx: &Ctx) -> FsResult<Vec<DirEntry>> {
        Err(EIO)
    }

    async fn open(&self, _ctx: &Ctx, _flags: OpenFlags) -> FsResult<HandleRef> {
        Err(EIO)
    }

    /// Lookup-or-create composed with open. Only dynamic directories
    /// support it.
    async fn create(&self, _ctx: &Ctx, _name: &str, _flags: OpenFlags) -> FsResult<(NodeRef, HandleRef)> {
        Err(EIO)
    }

    async fn mkdir(&self, _ctx: &Ctx, _name: &str) -> FsResult<NodeRef> {
        Err(EIO)
    }

    async fn remove(&self, _ctx: &Ctx, _name: &str, _is_dir: bool) -> FsResult<()> {
        Err(EIO)
    }

    async fn readlink(&self, _ctx: &Ctx) -> FsResult<String> {
        Err(EIO)
    }

    /// Resize to `size` bytes.
    async fn setattr_size(&self, _ctx: &Ctx, _size: u64) -> FsResult<()> {
        Err(EIO)
    }
}

impl std::fmt::Debug for dyn FileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHandle")
            .field("flags", &self.flags())
            .finish()
    }
}

/// An open file handle.
#[async_trait]
pub trait FileHandle: Send + Sync {
    fn flags(&self) -> HandleFlags {
        HandleFlags::default()
    }

    async fn read(&self, ctx: &Ctx, offset: u64, size: u32) -> FsResult<Vec<u8>>;

    async fn write(&self, _ctx: &Ctx, _offset: u64, _data: &[u8]) -> FsResult<u32> {
        Err(EIO)
    }

    async fn flush(&self, _ctx: &Ctx) -> FsResult<()> {
        Ok(())
    }

    async fn release(&self, _ctx: &Ctx, _flush: bool) -> FsResult<()> {
        Ok(())
    }
}

/// A read-only handle over a byte snapshot.
pub struct ByteSliceHandle {
    contents: Vec<u8>,
}

impl ByteSliceHandle {
    pub fn new(contents: Vec<u8>) -> HandleRef {
        Arc::new(Self { contents })
    }
}

#[async_trait]
impl FileHandle for ByteSliceHandle {
    async fn read(&self, _ctx: &Ctx, offset: u64, size: u32) -> FsResult<Vec<u8>> {
        Ok(read_slice(&self.contents, offset, size))
    }

    async fn write(&self, _ctx: &Ctx, _offset: u64, _data: &[u8]) -> FsResult<u32> {
        Err(EIO)
    }
}

/// Slice `data[offset..offset+size]`, clamped to bounds.
pub fn read_slice(data: &[u8], offset: u64, size: u32) -> Vec<u8> {
    let start = (offset as usize).min(data.len());
    let end = (start + size as usize).min(data.len());
    data[start..end].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_slice_clamps() {
        assert_eq!(read_slice(b"hello", 0, 5), b"hello");
        assert_eq!(read_slice(b"hello", 1, 3), b"ell");
        assert_eq!(read_slice(b"hello", 4, 10), b"o");
        assert_eq!(read_slice(b"hello", 9, 4), b"");
    }

    #[test]
    fn open_flags_from_libc() {
        let flags = OpenFlags::from_libc(libc::O_WRONLY | libc::O_TRUNC);
        assert!(flags.truncate);
        assert!(flags.write);

        let flags = OpenFlags::from_libc(libc::O_RDONLY);
        assert!(!flags.truncate);
        assert!(!flags.write);
    }
}
