//! Node kind implementations.

pub mod atomic_file;
pub mod dyndir;
pub mod link;
pub mod on_demand;
pub mod static_file;
pub mod stream_file;
pub mod tree;

pub use atomic_file::{AtomicBackend, AtomicFile};
pub use dyndir::{DirSource, DynamicDir, LookupResult};
pub use link::LinkNode;
pub use on_demand::OnDemandFile;
pub use static_file::StaticFile;
pub use stream_file::StreamFile;
pub use tree::Tree;
