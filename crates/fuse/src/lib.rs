//! Virtual filesystem layer for facetfs.
//!
//! The metadata store is presented as a composed tree of capability-typed
//! nodes: entities become directories, attributes become atomic files, and
//! boolean queries over attribute existence and contents become virtual
//! directories of symlinks or streaming list files. A FUSE adapter
//! translates kernel requests into node operations.

pub mod adapter;
pub mod cache;
pub mod changewatch;
pub mod composer;
pub mod entity_set;
pub mod error;
pub mod forms;
pub mod node;
pub mod nodes;

pub use adapter::FuseAdapter;
pub use changewatch::ChangeWatch;
pub use composer::{Facetfs, Params, ServiceData, SetupError};
pub use error::{FsError, FsResult};
pub use node::{Ctx, DirEntry, EntryType, FileHandle, Node, NodeAttr, NodeRef, OpenFlags};
