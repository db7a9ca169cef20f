//! The SQLite-backed metadata store.

use crate::dynquery::{self, SqlParam};
use crate::error::{MetadataError, MetadataResult};
use crate::models::{
    ActiveRow, DatabaseMetadata, DeleteRequest, DeletionType, EntityFile, FileHeader, HeaderRow,
    WriteRequest,
};
use crate::schema::Schema;
use crate::service::{EntityStream, MetadataService, QueryKind};
use async_stream::try_stream;
use async_trait::async_trait;
use facetfs_core::content::{Checksums, partition};
use facetfs_core::{shard, valid_path};
use futures::StreamExt;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const SCHEMA: Schema = Schema {
    name: "facetfs",
    upgrades: &[
        "CREATE TABLE items (
             row_guid TEXT NOT NULL PRIMARY KEY,
             namespace TEXT NOT NULL,
             tombstone BOOLEAN NOT NULL CHECK (tombstone=0 OR tombstone=1),
             active BOOLEAN NOT NULL CHECK (active=0 OR active=1),
             directory BOOLEAN NOT NULL CHECK (directory=0 OR directory=1),
             timestamp_unix_nano INTEGER NOT NULL,
             entity_id TEXT NOT NULL,
             entity_id_shard1 TEXT NOT NULL,
             entity_id_shard2 TEXT NOT NULL,
             filename TEXT NOT NULL,
             sha256 BLOB NULL,
             trimmed_sha256 BLOB NULL,
             data_length INTEGER NULL,
             trimmed_length INTEGER NULL,
             whitespace_prefix BLOB NULL,
             trimmed_data BLOB NULL,
             whitespace_suffix BLOB NULL,
             authorship_metadata BLOB NULL
         );

         CREATE TABLE sharding_key (
             always_one INTEGER UNIQUE CHECK (always_one=1),
             sharding_key_bytes BLOB NOT NULL
         );",
        "CREATE INDEX idx_items_key_active
             ON items (namespace, entity_id, filename, active, tombstone);
         CREATE INDEX idx_items_shards_active
             ON items (namespace, entity_id_shard1, entity_id_shard2, entity_id, filename, active, tombstone);",
    ],
};

const SELECT_ACTIVE_ROW: &str = "SELECT namespace, entity_id, filename, row_guid, \
     timestamp_unix_nano, directory, sha256, trimmed_sha256, data_length, trimmed_length, \
     whitespace_prefix, trimmed_data, whitespace_suffix \
     FROM items \
     WHERE active=1 AND tombstone=0 AND namespace = ? AND entity_id = ? AND filename = ?";

const MARK_ROWS_INACTIVE: &str = "UPDATE items \
     SET active = 0, trimmed_data = NULL, whitespace_prefix = NULL, whitespace_suffix = NULL \
     WHERE namespace = ? AND entity_id = ? AND filename = ?";

const INSERT_ROW: &str = "INSERT INTO items \
     (row_guid, namespace, entity_id, filename, tombstone, active, directory, \
      timestamp_unix_nano, entity_id_shard1, entity_id_shard2, \
      sha256, trimmed_sha256, data_length, trimmed_length, \
      whitespace_prefix, trimmed_data, whitespace_suffix, authorship_metadata) \
     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";

const SELECT_ENTITY_HEADERS: &str = "SELECT entity_id, filename, row_guid, timestamp_unix_nano, \
     directory, sha256, trimmed_sha256, data_length, trimmed_length \
     FROM items \
     WHERE active=1 AND tombstone=0 AND namespace = ? AND entity_id = ? \
     ORDER BY entity_id, filename";

const SELECT_ALL_ENTITIES: &str = "SELECT DISTINCT entity_id \
     FROM items \
     WHERE active=1 AND tombstone=0 AND namespace = ? \
     ORDER BY entity_id";

const SELECT_ENTITIES_BY_FILENAME: &str = "SELECT DISTINCT entity_id \
     FROM items \
     WHERE active=1 AND tombstone=0 AND namespace = ? AND filename = ? \
     ORDER BY entity_id";

const SELECT_NAMESPACES: &str =
    "SELECT DISTINCT namespace FROM items WHERE active=1 AND tombstone=0";

const SELECT_LAST_CHANGED: &str = "SELECT MAX(timestamp_unix_nano) FROM items";

const SELECT_SIZE_TOTALS: &str = "SELECT COUNT(1), COALESCE(SUM(active), 0), \
     COALESCE(SUM(COALESCE(length(whitespace_prefix), 0) \
                + COALESCE(length(trimmed_data), 0) \
                + COALESCE(length(whitespace_suffix), 0)), 0) \
     FROM items";

const SELECT_SHARDING_KEY: &str = "SELECT sharding_key_bytes FROM sharding_key LIMIT 1";

const INSERT_SHARDING_KEY: &str =
    "INSERT OR REPLACE INTO sharding_key (always_one, sharding_key_bytes) VALUES (1, ?)";

/// Hook invoked after any committed mutation.
pub type ChangeHook = Arc<dyn Fn() + Send + Sync>;

/// Options for opening a store.
#[derive(Clone, Default)]
pub struct StoreOptions {
    pub change_hook: Option<ChangeHook>,
}

/// SQLite-backed store. The pool is limited to a single connection, which
/// serializes all access; SQLite transactions are serializable.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    sharding_key: Vec<u8>,
    opts: StoreOptions,
}

impl SqliteStore {
    /// Open (creating if missing) a database file, apply schema upgrades,
    /// and load or generate the sharding key.
    pub async fn open(path: impl AsRef<Path>, opts: StoreOptions) -> MetadataResult<Self> {
        let connect = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));
        Self::connect(connect, opts).await
    }

    /// Open an in-memory database. For tests.
    pub async fn in_memory() -> MetadataResult<Self> {
        Self::connect(
            SqliteConnectOptions::new().in_memory(true),
            StoreOptions::default(),
        )
        .await
    }

    async fn connect(connect: SqliteConnectOptions, opts: StoreOptions) -> MetadataResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect)
            .await?;

        SCHEMA.apply(&pool).await?;

        let sharding_key = Self::ensure_sharding_key(&pool).await?;

        Ok(Self {
            pool,
            sharding_key,
            opts,
        })
    }

    async fn ensure_sharding_key(pool: &Pool<Sqlite>) -> MetadataResult<Vec<u8>> {
        let mut tx = pool.begin().await?;

        let existing: Option<Vec<u8>> = sqlx::query_scalar(SELECT_SHARDING_KEY)
            .fetch_optional(&mut *tx)
            .await?;

        let key = match existing {
            Some(key) => key,
            None => {
                tracing::info!("no sharding key found; generating");
                let key = shard::generate_key();
                sqlx::query(INSERT_SHARDING_KEY)
                    .bind(&key)
                    .execute(&mut *tx)
                    .await?;
                key
            }
        };

        tx.commit().await?;
        Ok(key)
    }

    /// The persisted sharding key.
    pub fn sharding_key(&self) -> &[u8] {
        &self.sharding_key
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Close the connection pool. Outstanding operations complete first.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn on_change(&self) {
        if let Some(hook) = &self.opts.change_hook {
            hook();
        }
    }

    async fn fetch_active_row(
        tx: &mut sqlx::Transaction<'_, Sqlite>,
        namespace: &str,
        entity_id: &str,
        filename: &str,
    ) -> MetadataResult<Option<ActiveRow>> {
        Ok(sqlx::query_as::<_, ActiveRow>(SELECT_ACTIVE_ROW)
            .bind(namespace)
            .bind(entity_id)
            .bind(filename)
            .fetch_optional(&mut **tx)
            .await?)
    }

    /// The shared write/delete transaction: guards, optimistic concurrency,
    /// no-op coalescing, deactivate-then-insert.
    #[allow(clippy::too_many_arguments)]
    async fn write_or_delete(
        &self,
        cancel: &CancellationToken,
        namespace: &str,
        entity_id: &str,
        filename: &str,
        old_revision_guid: &str,
        tombstone: bool,
        data: &[u8],
        authorship: Option<&str>,
        directory: bool,
        deletion_type: DeletionType,
    ) -> MetadataResult<FileHeader> {
        if cancel.is_cancelled() {
            return Err(MetadataError::Cancelled);
        }
        if tombstone && !data.is_empty() {
            return Err(MetadataError::Internal(
                "cannot both delete and write a file".into(),
            ));
        }
        if entity_id.is_empty() {
            return Err(MetadataError::InvalidArgument("missing entity ID".into()));
        }
        if filename.is_empty() {
            return Err(MetadataError::InvalidArgument("missing filename".into()));
        }
        if self.sharding_key.is_empty() {
            return Err(MetadataError::Internal("no sharding key available".into()));
        }

        let (shard1, shard2) = shard::shard(&self.sharding_key, entity_id);
        let now_unix_nano = OffsetDateTime::now_utc().unix_timestamp_nanos() as i64;
        let row_guid = Uuid::new_v4().to_string();

        let checksums = (!tombstone).then(|| Checksums::compute(data));

        let mut header = FileHeader {
            namespace: namespace.to_string(),
            entity_id: entity_id.to_string(),
            filename: filename.to_string(),
            row_guid: row_guid.clone(),
            timestamp_unix_nano: now_unix_nano,
            tombstone,
            directory: directory && !tombstone,
            checksums: checksums.clone(),
        };

        let mut tx = self.pool.begin().await?;

        let current = Self::fetch_active_row(&mut tx, namespace, entity_id, filename).await?;

        if let Some(current) = &current {
            match deletion_type {
                DeletionType::None => {
                    return Err(MetadataError::FailedPrecondition(format!(
                        "file {filename:?} already exists"
                    )));
                }
                DeletionType::File if current.directory => {
                    return Err(MetadataError::FailedPrecondition(format!(
                        "file {filename:?} is a directory"
                    )));
                }
                DeletionType::Dir if !current.directory => {
                    return Err(MetadataError::FailedPrecondition(format!(
                        "file {filename:?} is not a directory"
                    )));
                }
                _ => {}
            }
        }

        let current_guid = current.as_ref().map(|r| r.row_guid.as_str()).unwrap_or("");
        if !old_revision_guid.is_empty() && old_revision_guid != current_guid {
            return Err(MetadataError::FailedPrecondition(format!(
                "conflict: modification of {old_revision_guid:?} but last revision was {current_guid:?}"
            )));
        }

        if tombstone && current.is_none() {
            return Err(MetadataError::NotFound("file not found".into()));
        }

        if !tombstone {
            if let Some(current) = &current {
                if current.has_data_equal_to(data) {
                    // Idempotent write: keep the existing revision untouched.
                    header.row_guid = current.row_guid.clone();
                    header.timestamp_unix_nano = current.timestamp_unix_nano;
                    tx.commit().await?;
                    return Ok(header);
                }
            }
        }

        sqlx::query(MARK_ROWS_INACTIVE)
            .bind(namespace)
            .bind(entity_id)
            .bind(filename)
            .execute(&mut *tx)
            .await?;

        let (prefix, trimmed, suffix) = partition(data);
        let nonempty = |segment: Vec<u8>| (!segment.is_empty()).then_some(segment);
        let (prefix, trimmed, suffix) = if tombstone {
            (None, None, None)
        } else {
            (nonempty(prefix), nonempty(trimmed), nonempty(suffix))
        };

        sqlx::query(INSERT_ROW)
            .bind(&row_guid)
            .bind(namespace)
            .bind(entity_id)
            .bind(filename)
            .bind(tombstone)
            .bind(true)
            .bind(directory)
            .bind(now_unix_nano)
            .bind(&shard1)
            .bind(&shard2)
            .bind(checksums.as_ref().map(|c| c.sha256.clone()))
            .bind(checksums.as_ref().map(|c| c.trimmed_sha256.clone()))
            .bind(checksums.as_ref().map(|c| c.length))
            .bind(checksums.as_ref().map(|c| c.trimmed_length))
            .bind(prefix)
            .bind(trimmed)
            .bind(suffix)
            .bind(authorship.map(|s| s.as_bytes().to_vec()))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        self.on_change();

        tracing::debug!(
            namespace = %namespace,
            entity_id = %entity_id,
            filename = %filename,
            row_guid = %header.row_guid,
            tombstone,
            "committed new revision"
        );

        Ok(header)
    }
}

#[async_trait]
impl MetadataService for SqliteStore {
    async fn write_file(
        &self,
        cancel: &CancellationToken,
        req: WriteRequest,
    ) -> MetadataResult<FileHeader> {
        if !valid_path(&req.filename) {
            return Err(MetadataError::InvalidArgument(format!(
                "invalid filename: {:?}",
                req.filename
            )));
        }
        if req.directory && !req.data.is_empty() {
            return Err(MetadataError::InvalidArgument(
                "a file cannot be both a directory and contain data".into(),
            ));
        }

        // Creating a directory must not silently replace anything.
        let deletion_type = if req.directory {
            DeletionType::None
        } else {
            DeletionType::File
        };

        self.write_or_delete(
            cancel,
            &req.namespace,
            &req.entity_id,
            &req.filename,
            &req.old_revision_guid,
            false,
            &req.data,
            req.authorship.as_deref(),
            req.directory,
            deletion_type,
        )
        .await
    }

    async fn delete_file(
        &self,
        cancel: &CancellationToken,
        req: DeleteRequest,
    ) -> MetadataResult<FileHeader> {
        self.write_or_delete(
            cancel,
            &req.namespace,
            &req.entity_id,
            &req.filename,
            &req.old_revision_guid,
            true,
            &[],
            None,
            false,
            req.deletion_type,
        )
        .await
    }

    async fn read_file(
        &self,
        cancel: &CancellationToken,
        namespace: &str,
        entity_id: &str,
        filename: &str,
    ) -> MetadataResult<EntityFile> {
        if cancel.is_cancelled() {
            return Err(MetadataError::Cancelled);
        }
        if entity_id.is_empty() {
            return Err(MetadataError::InvalidArgument("missing entity ID".into()));
        }
        if filename.is_empty() {
            return Err(MetadataError::InvalidArgument("missing filename".into()));
        }

        let mut tx = self.pool.begin().await?;
        let row = Self::fetch_active_row(&mut tx, namespace, entity_id, filename).await?;
        tx.commit().await?;

        let Some(row) = row else {
            return Err(MetadataError::NotFound(format!(
                "file not found: entity_id={entity_id:?} filename={filename:?}"
            )));
        };

        Ok(EntityFile {
            data: row.assemble(),
            header: row.header(),
        })
    }

    async fn get_entity(
        &self,
        cancel: &CancellationToken,
        namespace: &str,
        entity_id: &str,
    ) -> MetadataResult<BTreeMap<String, FileHeader>> {
        if cancel.is_cancelled() {
            return Err(MetadataError::Cancelled);
        }
        if entity_id.is_empty() {
            return Err(MetadataError::InvalidArgument("missing entity ID".into()));
        }

        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query_as::<_, HeaderRow>(SELECT_ENTITY_HEADERS)
            .bind(namespace)
            .bind(entity_id)
            .fetch_all(&mut *tx)
            .await?;
        tx.commit().await?;

        if rows.is_empty() {
            return Err(MetadataError::NotFound(format!(
                "entity not found: {entity_id:?}"
            )));
        }

        let mut files = BTreeMap::new();
        for row in rows {
            let checksums = match (
                row.data_length,
                row.trimmed_length,
                row.sha256,
                row.trimmed_sha256,
            ) {
                (Some(length), Some(trimmed_length), Some(sha256), Some(trimmed_sha256)) => {
                    Some(Checksums {
                        length,
                        trimmed_length,
                        sha256,
                        trimmed_sha256,
                    })
                }
                _ => None,
            };
            files.insert(
                row.filename.clone(),
                FileHeader {
                    namespace: namespace.to_string(),
                    entity_id: row.entity_id,
                    filename: row.filename,
                    row_guid: row.row_guid,
                    timestamp_unix_nano: row.timestamp_unix_nano,
                    tombstone: false,
                    directory: row.directory,
                    checksums,
                },
            );
        }

        Ok(files)
    }

    async fn list_namespaces(&self, cancel: &CancellationToken) -> MetadataResult<Vec<String>> {
        if cancel.is_cancelled() {
            return Err(MetadataError::Cancelled);
        }

        let mut tx = self.pool.begin().await?;
        let namespaces = sqlx::query_scalar(SELECT_NAMESPACES)
            .fetch_all(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(namespaces)
    }

    async fn database_metadata(
        &self,
        cancel: &CancellationToken,
        only_timestamps: bool,
    ) -> MetadataResult<DatabaseMetadata> {
        if cancel.is_cancelled() {
            return Err(MetadataError::Cancelled);
        }

        let mut tx = self.pool.begin().await?;

        let last_changed: Option<i64> = sqlx::query_scalar(SELECT_LAST_CHANGED)
            .fetch_one(&mut *tx)
            .await?;

        let mut metadata = DatabaseMetadata {
            last_changed_unix_nano: last_changed,
            ..Default::default()
        };

        if !only_timestamps {
            let (total_rows, active_rows, total_stored_data_bytes): (i64, i64, i64) =
                sqlx::query_as(SELECT_SIZE_TOTALS).fetch_one(&mut *tx).await?;
            metadata.total_rows = total_rows;
            metadata.active_rows = active_rows;
            metadata.total_stored_data_bytes = total_stored_data_bytes;
            if !self.sharding_key.is_empty() {
                metadata.sharding_key = Some(self.sharding_key.clone());
            }
        }

        tx.commit().await?;
        Ok(metadata)
    }

    fn query_entities(
        &self,
        cancel: CancellationToken,
        namespace: String,
        kind: QueryKind,
    ) -> EntityStream {
        let compiled: MetadataResult<(String, Vec<SqlParam>)> = match kind {
            QueryKind::All => Ok((
                SELECT_ALL_ENTITIES.to_string(),
                vec![SqlParam::Text(namespace)],
            )),
            QueryKind::HasFilename(filename) if filename.is_empty() => Err(
                MetadataError::InvalidArgument("filename query with empty filename".into()),
            ),
            QueryKind::HasFilename(filename) => Ok((
                SELECT_ENTITIES_BY_FILENAME.to_string(),
                vec![SqlParam::Text(namespace), SqlParam::Text(filename)],
            )),
            QueryKind::Parsed(query) => dynquery::compile(&namespace, &query),
        };

        let pool = self.pool.clone();

        Box::pin(try_stream! {
            let (sql, params) = compiled?;

            let mut tx = pool.begin().await?;
            {
                let mut query = sqlx::query_scalar::<_, String>(&sql);
                for param in &params {
                    query = match param {
                        SqlParam::Text(s) => query.bind(s.clone()),
                        SqlParam::Int(i) => query.bind(*i),
                        SqlParam::Blob(b) => query.bind(b.clone()),
                    };
                }

                let mut rows = query.fetch(&mut *tx);
                while let Some(row) = rows.next().await {
                    let row = if cancel.is_cancelled() {
                        Err(MetadataError::Cancelled)
                    } else {
                        row.map_err(MetadataError::from)
                    };
                    yield row?;
                }
            }
            tx.commit().await?;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_generates_and_persists_sharding_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata.db");

        let store = SqliteStore::open(&path, StoreOptions::default()).await.unwrap();
        let key = store.sharding_key().to_vec();
        assert_eq!(key.len(), shard::KEY_LEN);
        store.close().await;

        let reopened = SqliteStore::open(&path, StoreOptions::default()).await.unwrap();
        assert_eq!(reopened.sharding_key(), key.as_slice());
    }

    #[tokio::test]
    async fn in_memory_store_is_empty() {
        let store = SqliteStore::in_memory().await.unwrap();
        let cancel = CancellationToken::new();
        let metadata = store.database_metadata(&cancel, false).await.unwrap();
        assert_eq!(metadata.total_rows, 0);
        assert_eq!(metadata.last_changed_unix_nano, None);
        assert!(metadata.sharding_key.is_some());
    }
}
