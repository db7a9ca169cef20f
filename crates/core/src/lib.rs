//! Core domain types and shared logic for facetfs.
//!
//! This crate defines the canonical vocabulary used across all other crates:
//! - Filename and attribute-path validation
//! - The entity query clause language and its parser
//! - Content checksums and whitespace partitioning
//! - Shard derivation from the per-database secret key
//! - Configuration types

pub mod config;
pub mod content;
pub mod error;
pub mod filename;
pub mod query;
pub mod shard;

pub use config::{AppConfig, FsConfig};
pub use content::{Checksums, partition, trim_bytes};
pub use error::{Error, Result};
pub use filename::{valid_filename, valid_path};
pub use query::{Clause, ClauseKind, EntityQuery};
