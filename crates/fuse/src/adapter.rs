//! The FUSE kernel adapter.
//!
//! Translates kernel operations into node-interface calls. Each request is
//! dispatched on its own tokio task with a child cancellation token, so a
//! slow storage call never stalls the kernel session loop. An inode table
//! maps kernel inode numbers to node references (with lookup counts driven
//! by `forget`), and a handle table maps file handles to open handles.

use crate::error::FsError;
use crate::node::{Ctx, EntryType, HandleFlags, HandleRef, NodeAttr, NodeRef, OpenFlags};
use fuser::{
    FileAttr, FileType, MountOption, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request, TimeOrNow,
};
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::ffi::OsStr;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::runtime::Handle as RuntimeHandle;
use tokio_util::sync::CancellationToken;

const TTL: Duration = Duration::from_secs(1);
const ROOT_INO: u64 = fuser::FUSE_ROOT_ID;

struct InodeEntry {
    node: NodeRef,
    parent: u64,
    lookups: u64,
}

struct InodeTable {
    entries: HashMap<u64, InodeEntry>,
    by_ptr: HashMap<usize, u64>,
    next_ino: u64,
}

struct HandleTable {
    entries: HashMap<u64, HandleRef>,
    next_fh: u64,
}

struct AdapterState {
    nodes: Mutex<InodeTable>,
    handles: Mutex<HandleTable>,
    shutdown: CancellationToken,
    uid: u32,
    gid: u32,
}

fn node_ptr(node: &NodeRef) -> usize {
    Arc::as_ptr(node) as *const u8 as usize
}

impl AdapterState {
    fn node(&self, ino: u64) -> Option<NodeRef> {
        self.nodes
            .lock()
            .expect("inode table lock")
            .entries
            .get(&ino)
            .map(|entry| entry.node.clone())
    }

    fn parent_of(&self, ino: u64) -> u64 {
        self.nodes
            .lock()
            .expect("inode table lock")
            .entries
            .get(&ino)
            .map(|entry| entry.parent)
            .unwrap_or(ROOT_INO)
    }

    /// Register (or re-reference) a node under a parent; returns its inode.
    fn register(&self, parent: u64, node: &NodeRef) -> u64 {
        let mut table = self.nodes.lock().expect("inode table lock");
        let ptr = node_ptr(node);

        if let Some(&ino) = table.by_ptr.get(&ptr) {
            if let Some(entry) = table.entries.get_mut(&ino) {
                entry.lookups += 1;
                entry.parent = parent;
                return ino;
            }
        }

        let ino = table.next_ino;
        table.next_ino += 1;
        table.by_ptr.insert(ptr, ino);
        table.entries.insert(
            ino,
            InodeEntry {
                node: node.clone(),
                parent,
                lookups: 1,
            },
        );
        ino
    }

    fn forget(&self, ino: u64, nlookup: u64) {
        if ino == ROOT_INO {
            return;
        }
        let mut table = self.nodes.lock().expect("inode table lock");
        if let Some(entry) = table.entries.get_mut(&ino) {
            entry.lookups = entry.lookups.saturating_sub(nlookup);
            if entry.lookups == 0 {
                let ptr = node_ptr(&entry.node);
                table.entries.remove(&ino);
                table.by_ptr.remove(&ptr);
            }
        }
    }

    fn register_handle(&self, handle: HandleRef) -> u64 {
        let mut table = self.handles.lock().expect("handle table lock");
        let fh = table.next_fh;
        table.next_fh += 1;
        table.entries.insert(fh, handle);
        fh
    }

    fn handle(&self, fh: u64) -> Option<HandleRef> {
        self.handles
            .lock()
            .expect("handle table lock")
            .entries
            .get(&fh)
            .cloned()
    }

    fn remove_handle(&self, fh: u64) -> Option<HandleRef> {
        self.handles
            .lock()
            .expect("handle table lock")
            .entries
            .remove(&fh)
    }

    fn file_attr(&self, ino: u64, attr: NodeAttr) -> FileAttr {
        let kind = match attr.kind {
            EntryType::Dir => FileType::Directory,
            EntryType::Link => FileType::Symlink,
            EntryType::File => FileType::RegularFile,
        };
        FileAttr {
            ino,
            size: attr.size,
            blocks: attr.size.div_ceil(512),
            atime: UNIX_EPOCH,
            mtime: UNIX_EPOCH,
            ctime: UNIX_EPOCH,
            crtime: UNIX_EPOCH,
            kind,
            perm: attr.perm,
            nlink: 1,
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: 4096,
            flags: 0,
        }
    }

    fn ctx(&self) -> Ctx {
        self.shutdown.child_token()
    }
}

fn open_flag_bits(flags: HandleFlags) -> u32 {
    let mut bits = 0;
    if flags.direct_io {
        bits |= fuser::consts::FOPEN_DIRECT_IO;
    }
    if flags.nonseekable {
        bits |= fuser::consts::FOPEN_NONSEEKABLE;
    }
    bits
}

fn dirent_ino(name: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    hasher.finish() | 1
}

/// The `fuser::Filesystem` implementation over a node tree.
pub struct FuseAdapter {
    runtime: RuntimeHandle,
    state: Arc<AdapterState>,
}

impl FuseAdapter {
    pub fn new(root: NodeRef, runtime: RuntimeHandle) -> Self {
        let mut entries = HashMap::new();
        let mut by_ptr = HashMap::new();
        by_ptr.insert(node_ptr(&root), ROOT_INO);
        entries.insert(
            ROOT_INO,
            InodeEntry {
                node: root,
                parent: ROOT_INO,
                lookups: 1,
            },
        );

        Self {
            runtime,
            state: Arc::new(AdapterState {
                nodes: Mutex::new(InodeTable {
                    entries,
                    by_ptr,
                    next_ino: ROOT_INO + 1,
                }),
                handles: Mutex::new(HandleTable {
                    entries: HashMap::new(),
                    next_fh: 1,
                }),
                shutdown: CancellationToken::new(),
                uid: unsafe { libc::getuid() },
                gid: unsafe { libc::getgid() },
            }),
        }
    }

    /// Mount options matching the served database.
    pub fn mount_options(fs_name: &str) -> Vec<MountOption> {
        vec![
            MountOption::FSName(fs_name.to_string()),
            MountOption::Subtype("facetfs".to_string()),
        ]
    }
}

fn os_name(name: &OsStr) -> Option<String> {
    name.to_str().map(String::from)
}

impl fuser::Filesystem for FuseAdapter {
    fn init(
        &mut self,
        _req: &Request<'_>,
        _config: &mut fuser::KernelConfig,
    ) -> Result<(), libc::c_int> {
        tracing::info!("filesystem initialized");
        Ok(())
    }

    fn destroy(&mut self) {
        self.state.shutdown.cancel();
        tracing::info!("filesystem unmounted");
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(name) = os_name(name) else {
            reply.error(libc::ENOENT);
            return;
        };
        let state = self.state.clone();
        self.runtime.spawn(async move {
            let ctx = state.ctx();
            let Some(parent_node) = state.node(parent) else {
                reply.error(libc::ENOENT);
                return;
            };
            match parent_node.lookup(&ctx, &name).await {
                Ok(node) => match node.attr(&ctx).await {
                    Ok(attr) => {
                        let ino = state.register(parent, &node);
                        reply.entry(&TTL, &state.file_attr(ino, attr), 0);
                    }
                    Err(FsError(errno)) => reply.error(errno),
                },
                Err(FsError(errno)) => reply.error(errno),
            }
        });
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        self.state.forget(ino, nlookup);
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let state = self.state.clone();
        self.runtime.spawn(async move {
            let ctx = state.ctx();
            let Some(node) = state.node(ino) else {
                reply.error(libc::ENOENT);
                return;
            };
            match node.attr(&ctx).await {
                Ok(attr) => reply.attr(&TTL, &state.file_attr(ino, attr)),
                Err(FsError(errno)) => reply.error(errno),
            }
        });
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let state = self.state.clone();
        self.runtime.spawn(async move {
            let ctx = state.ctx();
            let Some(node) = state.node(ino) else {
                reply.error(libc::ENOENT);
                return;
            };
            if let Some(size) = size {
                if let Err(FsError(errno)) = node.setattr_size(&ctx, size).await {
                    reply.error(errno);
                    return;
                }
            }
            match node.attr(&ctx).await {
                Ok(attr) => reply.attr(&TTL, &state.file_attr(ino, attr)),
                Err(FsError(errno)) => reply.error(errno),
            }
        });
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        let state = self.state.clone();
        self.runtime.spawn(async move {
            let ctx = state.ctx();
            let Some(node) = state.node(ino) else {
                reply.error(libc::ENOENT);
                return;
            };
            match node.readlink(&ctx).await {
                Ok(target) => reply.data(target.as_bytes()),
                Err(FsError(errno)) => reply.error(errno),
            }
        });
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let Some(name) = os_name(name) else {
            reply.error(libc::EIO);
            return;
        };
        let state = self.state.clone();
        self.runtime.spawn(async move {
            let ctx = state.ctx();
            let Some(parent_node) = state.node(parent) else {
                reply.error(libc::ENOENT);
                return;
            };
            match parent_node.mkdir(&ctx, &name).await {
                Ok(node) => match node.attr(&ctx).await {
                    Ok(attr) => {
                        let ino = state.register(parent, &node);
                        reply.entry(&TTL, &state.file_attr(ino, attr), 0);
                    }
                    Err(FsError(errno)) => reply.error(errno),
                },
                Err(FsError(errno)) => reply.error(errno),
            }
        });
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        self.remove_common(parent, name, false, reply);
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        self.remove_common(parent, name, true, reply);
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let state = self.state.clone();
        self.runtime.spawn(async move {
            let ctx = state.ctx();
            let Some(node) = state.node(ino) else {
                reply.error(libc::ENOENT);
                return;
            };
            match node.open(&ctx, OpenFlags::from_libc(flags)).await {
                Ok(handle) => {
                    let bits = open_flag_bits(handle.flags());
                    let fh = state.register_handle(handle);
                    reply.opened(fh, bits);
                }
                Err(FsError(errno)) => reply.error(errno),
            }
        });
    }

    #[allow(clippy::too_many_arguments)]
    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }
        let state = self.state.clone();
        self.runtime.spawn(async move {
            let ctx = state.ctx();
            let Some(handle) = state.handle(fh) else {
                reply.error(libc::EIO);
                return;
            };
            match handle.read(&ctx, offset as u64, size).await {
                Ok(data) => reply.data(&data),
                Err(FsError(errno)) => reply.error(errno),
            }
        });
    }

    #[allow(clippy::too_many_arguments)]
    fn write(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }
        let data = data.to_vec();
        let state = self.state.clone();
        self.runtime.spawn(async move {
            let ctx = state.ctx();
            let Some(handle) = state.handle(fh) else {
                reply.error(libc::EIO);
                return;
            };
            match handle.write(&ctx, offset as u64, &data).await {
                Ok(written) => reply.written(written),
                Err(FsError(errno)) => reply.error(errno),
            }
        });
    }

    fn flush(&mut self, _req: &Request<'_>, _ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        let state = self.state.clone();
        self.runtime.spawn(async move {
            let ctx = state.ctx();
            let Some(handle) = state.handle(fh) else {
                reply.error(libc::EIO);
                return;
            };
            match handle.flush(&ctx).await {
                Ok(()) => reply.ok(),
                Err(FsError(errno)) => reply.error(errno),
            }
        });
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        flush: bool,
        reply: ReplyEmpty,
    ) {
        let state = self.state.clone();
        self.runtime.spawn(async move {
            let ctx = state.ctx();
            if let Some(handle) = state.remove_handle(fh) {
                if let Err(err) = handle.release(&ctx, flush).await {
                    tracing::warn!(error = %err, "release failed");
                }
            }
            reply.ok();
        });
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let state = self.state.clone();
        self.runtime.spawn(async move {
            let ctx = state.ctx();
            let Some(node) = state.node(ino) else {
                reply.error(libc::ENOENT);
                return;
            };
            match node.attr(&ctx).await {
                Ok(attr) if attr.kind == EntryType::Dir => reply.opened(0, 0),
                Ok(_) => reply.error(libc::ENOTDIR),
                Err(FsError(errno)) => reply.error(errno),
            }
        });
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }
        let state = self.state.clone();
        self.runtime.spawn(async move {
            let ctx = state.ctx();
            let Some(node) = state.node(ino) else {
                reply.error(libc::ENOENT);
                return;
            };

            let children = match node.read_dir_all(&ctx).await {
                Ok(children) => children,
                Err(FsError(errno)) => {
                    reply.error(errno);
                    return;
                }
            };

            let mut entries: Vec<(u64, FileType, String)> = vec![
                (ino, FileType::Directory, ".".to_string()),
                (state.parent_of(ino), FileType::Directory, "..".to_string()),
            ];
            for child in children {
                let kind = match child.kind {
                    EntryType::Dir => FileType::Directory,
                    EntryType::Link => FileType::Symlink,
                    EntryType::File => FileType::RegularFile,
                };
                entries.push((dirent_ino(&child.name), kind, child.name));
            }

            for (i, (entry_ino, kind, name)) in
                entries.into_iter().enumerate().skip(offset as usize)
            {
                if reply.add(entry_ino, (i + 1) as i64, kind, &name) {
                    break;
                }
            }
            reply.ok();
        });
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let Some(name) = os_name(name) else {
            reply.error(libc::EIO);
            return;
        };
        let state = self.state.clone();
        self.runtime.spawn(async move {
            let ctx = state.ctx();
            let Some(parent_node) = state.node(parent) else {
                reply.error(libc::ENOENT);
                return;
            };
            match parent_node
                .create(&ctx, &name, OpenFlags::from_libc(flags))
                .await
            {
                Ok((node, handle)) => match node.attr(&ctx).await {
                    Ok(attr) => {
                        let ino = state.register(parent, &node);
                        let bits = open_flag_bits(handle.flags());
                        let fh = state.register_handle(handle);
                        reply.created(&TTL, &state.file_attr(ino, attr), 0, fh, bits);
                    }
                    Err(FsError(errno)) => reply.error(errno),
                },
                Err(FsError(errno)) => reply.error(errno),
            }
        });
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        reply.statfs(0, 0, 0, 0, 0, 4096, 255, 0);
    }
}

impl FuseAdapter {
    fn remove_common(&mut self, parent: u64, name: &OsStr, is_dir: bool, reply: ReplyEmpty) {
        let Some(name) = os_name(name) else {
            reply.error(libc::ENOENT);
            return;
        };
        let state = self.state.clone();
        self.runtime.spawn(async move {
            let ctx = state.ctx();
            let Some(parent_node) = state.node(parent) else {
                reply.error(libc::ENOENT);
                return;
            };
            match parent_node.remove(&ctx, &name, is_dir).await {
                Ok(()) => reply.ok(),
                Err(FsError(errno)) => reply.error(errno),
            }
        });
    }
}
