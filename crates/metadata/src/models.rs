//! Row models and request/response types for the storage engine.

use facetfs_core::content::Checksums;
use sqlx::FromRow;

/// How an existing row at the target path constrains a write or delete.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeletionType {
    /// The target must not exist.
    None,
    /// The target, if present, must be a plain file.
    File,
    /// The target, if present, must be a directory.
    Dir,
    /// No type check.
    Any,
}

/// A write through the engine. `old_revision_guid` of `""` skips the
/// optimistic concurrency check.
#[derive(Clone, Debug)]
pub struct WriteRequest {
    pub namespace: String,
    pub entity_id: String,
    pub filename: String,
    pub data: Vec<u8>,
    pub old_revision_guid: String,
    pub directory: bool,
    /// Opaque serialized authorship metadata recorded on the new row.
    pub authorship: Option<String>,
}

/// A delete through the engine.
#[derive(Clone, Debug)]
pub struct DeleteRequest {
    pub namespace: String,
    pub entity_id: String,
    pub filename: String,
    pub old_revision_guid: String,
    pub deletion_type: DeletionType,
}

/// Header describing one file revision (no content bytes).
#[derive(Clone, Debug)]
pub struct FileHeader {
    pub namespace: String,
    pub entity_id: String,
    pub filename: String,
    pub row_guid: String,
    pub timestamp_unix_nano: i64,
    pub tombstone: bool,
    pub directory: bool,
    /// Absent on tombstones.
    pub checksums: Option<Checksums>,
}

/// A file revision with its reassembled content bytes.
#[derive(Clone, Debug)]
pub struct EntityFile {
    pub header: FileHeader,
    pub data: Vec<u8>,
}

/// Aggregate database metadata.
#[derive(Clone, Debug, Default)]
pub struct DatabaseMetadata {
    pub last_changed_unix_nano: Option<i64>,
    pub total_rows: i64,
    pub active_rows: i64,
    pub total_stored_data_bytes: i64,
    /// Omitted when only timestamps were requested.
    pub sharding_key: Option<Vec<u8>>,
}

/// The active row for a `(namespace, entity_id, filename)` as read inside
/// the write and read transactions.
#[derive(Clone, Debug, FromRow)]
pub(crate) struct ActiveRow {
    pub namespace: String,
    pub entity_id: String,
    pub filename: String,
    pub row_guid: String,
    pub timestamp_unix_nano: i64,
    pub directory: bool,
    pub sha256: Option<Vec<u8>>,
    pub trimmed_sha256: Option<Vec<u8>>,
    pub data_length: Option<i64>,
    pub trimmed_length: Option<i64>,
    pub whitespace_prefix: Option<Vec<u8>>,
    pub trimmed_data: Option<Vec<u8>>,
    pub whitespace_suffix: Option<Vec<u8>>,
}

impl ActiveRow {
    /// Reassemble the stored bytes: prefix ++ trimmed ++ suffix, NULL
    /// segments reading as empty.
    pub fn assemble(&self) -> Vec<u8> {
        let mut data = self.whitespace_prefix.clone().unwrap_or_default();
        data.extend_from_slice(self.trimmed_data.as_deref().unwrap_or_default());
        data.extend_from_slice(self.whitespace_suffix.as_deref().unwrap_or_default());
        data
    }

    pub fn has_data_equal_to(&self, data: &[u8]) -> bool {
        let prefix = self.whitespace_prefix.as_deref().unwrap_or_default();
        let trimmed = self.trimmed_data.as_deref().unwrap_or_default();
        let suffix = self.whitespace_suffix.as_deref().unwrap_or_default();
        if data.len() != prefix.len() + trimmed.len() + suffix.len() {
            return false;
        }
        data[..prefix.len()] == *prefix
            && data[prefix.len()..prefix.len() + trimmed.len()] == *trimmed
            && data[prefix.len() + trimmed.len()..] == *suffix
    }

    pub fn checksums(&self) -> Option<Checksums> {
        Some(Checksums {
            length: self.data_length?,
            trimmed_length: self.trimmed_length?,
            sha256: self.sha256.clone()?,
            trimmed_sha256: self.trimmed_sha256.clone()?,
        })
    }

    pub fn header(&self) -> FileHeader {
        FileHeader {
            namespace: self.namespace.clone(),
            entity_id: self.entity_id.clone(),
            filename: self.filename.clone(),
            row_guid: self.row_guid.clone(),
            timestamp_unix_nano: self.timestamp_unix_nano,
            tombstone: false,
            directory: self.directory,
            checksums: self.checksums(),
        }
    }
}

/// Header row shape for entity listings (no content blobs selected).
#[derive(Clone, Debug, FromRow)]
pub(crate) struct HeaderRow {
    pub entity_id: String,
    pub filename: String,
    pub row_guid: String,
    pub timestamp_unix_nano: i64,
    pub directory: bool,
    pub sha256: Option<Vec<u8>>,
    pub trimmed_sha256: Option<Vec<u8>>,
    pub data_length: Option<i64>,
    pub trimmed_length: Option<i64>,
}
