//! Assembly of the mount tree.
//!
//! ```text
//! /
//! ├── service/                         process and database metadata
//! ├── namespace/<ns>/{entities,query}  per-namespace subtrees
//! ├── entities/{all,shard,link,list}   default namespace
//! └── query/<querystring>/...          default namespace
//! ```

use crate::cache::{AttribsEntry, ContentsEntry, FileKey, FsCaches};
use crate::entity_set::{AllEntities, QueryEntities};
use crate::error::{EIO, ENOENT, FsError, FsResult};
use crate::forms::entities_node;
use crate::node::{Ctx, DirEntry, EntryType, NodeAttr, NodeRef};
use crate::nodes::atomic_file::{AtomicBackend, AtomicFile};
use crate::nodes::dyndir::{DirSource, DynamicDir, LookupResult};
use crate::nodes::on_demand::OnDemandFile;
use crate::nodes::static_file::StaticFile;
use crate::nodes::tree::Tree;
use async_trait::async_trait;
use facetfs_core::{FsConfig, valid_filename};
use facetfs_metadata::{
    DeleteRequest, DeletionType, MetadataError, MetadataService, WriteRequest,
};
use regex::Regex;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Construction failures.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("bad forbidden-filename pattern {pattern:?}: {source}")]
    BadPattern {
        pattern: String,
        source: regex::Error,
    },

    #[error("no sharding key provided by the storage service")]
    NoShardingKey,

    #[error("serializing version info: {0}")]
    VersionInfo(#[from] serde_json::Error),

    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

/// Descriptive data surfaced under `service/`.
#[derive(Clone, Debug, Default)]
pub struct ServiceData {
    pub hostname: String,
    pub database_path: String,
    pub http_address: Option<String>,
    pub grpc_address: Option<String>,
    pub server_cert_pem: Option<Vec<u8>>,
    pub version_info: serde_json::Value,
}

/// Filesystem construction parameters.
pub struct Params {
    pub service_data: ServiceData,
    pub mountpoint: PathBuf,
    pub config: FsConfig,
}

/// Shared state threaded through every node source.
pub struct FsContext {
    pub(crate) service: Arc<dyn MetadataService>,
    pub(crate) caches: Arc<FsCaches>,
    pub(crate) config: FsConfig,
    forbidden: Vec<Regex>,
    shard_key: Vec<u8>,
    mountpoint: PathBuf,
    authorship: String,
    next_query_id: AtomicI64,
}

impl FsContext {
    pub(crate) fn is_filename_forbidden(&self, filename: &str) -> bool {
        self.forbidden.iter().any(|re| re.is_match(filename))
    }

    pub(crate) fn shards_of(&self, entity_id: &str) -> Vec<String> {
        let (shard1, shard2) = facetfs_core::shard::shard(&self.shard_key, entity_id);
        vec![shard1, shard2]
    }

    pub(crate) fn has_shards(&self, want: &[String], entity_id: &str) -> bool {
        if want.is_empty() {
            return true;
        }
        let actual = self.shards_of(entity_id);
        want.iter().zip(actual.iter()).all(|(w, a)| w == a)
    }

    /// The absolute canonical shard path for an entity.
    pub(crate) fn abs_canonical_path(&self, namespace: &str, entity_id: &str) -> String {
        let mut path = self.mountpoint.clone();
        if !namespace.is_empty() {
            path = path.join("namespace").join(namespace);
        }
        let shards = self.shards_of(entity_id);
        path.join("entities")
            .join("shard")
            .join(&shards[0])
            .join(&shards[1])
            .join(entity_id)
            .display()
            .to_string()
    }

    /// Read a file and cache the result; a NotFound is cached as absent.
    async fn read_and_cache(&self, ctx: &Ctx, key: &FileKey) -> FsResult<ContentsEntry> {
        match self
            .service
            .read_file(ctx, &key.namespace, &key.entity_id, &key.filename)
            .await
        {
            Ok(file) => {
                let entry = ContentsEntry {
                    row_guid: file.header.row_guid.clone(),
                    data: file.data,
                    exists: true,
                    directory: file.header.directory,
                };
                self.caches
                    .put_file(key, &entry.data, &entry.row_guid, entry.directory);
                Ok(entry)
            }
            Err(err) if err.is_not_found() => {
                self.caches.put_absent(key);
                Ok(ContentsEntry::absent())
            }
            Err(err) => Err(err.into()),
        }
    }

    pub(crate) async fn file_contents(&self, ctx: &Ctx, key: &FileKey) -> FsResult<ContentsEntry> {
        if let Some(entry) = self.caches.get_contents(key) {
            return Ok(entry);
        }
        self.read_and_cache(ctx, key).await
    }

    pub(crate) async fn file_attribs(&self, ctx: &Ctx, key: &FileKey) -> FsResult<AttribsEntry> {
        if let Some(entry) = self.caches.get_attribs(key) {
            return Ok(entry);
        }
        let contents = self.read_and_cache(ctx, key).await?;
        Ok(AttribsEntry {
            row_guid: contents.row_guid,
            length: contents.data.len() as u64,
            exists: contents.exists,
            directory: contents.directory,
        })
    }

    /// Write a file or directory row through the service, refreshing the
    /// caches on success. Returns the new revision GUID.
    pub(crate) async fn write_through(
        &self,
        ctx: &Ctx,
        key: &FileKey,
        data: Vec<u8>,
        old_revision: String,
        directory: bool,
    ) -> FsResult<String> {
        let header = self
            .service
            .write_file(
                ctx,
                WriteRequest {
                    namespace: key.namespace.clone(),
                    entity_id: key.entity_id.clone(),
                    filename: key.filename.clone(),
                    data: data.clone(),
                    old_revision_guid: old_revision,
                    directory,
                    authorship: Some(self.authorship.clone()),
                },
            )
            .await?;

        self.caches
            .put_file(key, &data, &header.row_guid, directory);
        Ok(header.row_guid)
    }

    /// The canonical directory node for an entity.
    pub(crate) fn entity_root_node(self: &Arc<Self>, namespace: String, entity_id: String) -> NodeRef {
        DynamicDir::new(
            Arc::new(EntityDirSource {
                fsctx: self.clone(),
                namespace,
                entity_id,
                parent: String::new(),
            }),
            1000,
        )
    }
}

/// The filesystem: shared context plus the assembled root.
pub struct Facetfs {
    fsctx: Arc<FsContext>,
    root: NodeRef,
}

impl Facetfs {
    pub async fn new(
        service: Arc<dyn MetadataService>,
        params: Params,
    ) -> Result<Self, SetupError> {
        let metadata = service.database_metadata(&Ctx::new(), false).await?;
        let shard_key = metadata
            .sharding_key
            .filter(|key| !key.is_empty())
            .ok_or(SetupError::NoShardingKey)?;

        let mut forbidden = Vec::new();
        for pattern in &params.config.forbidden_filenames {
            forbidden.push(Regex::new(pattern).map_err(|source| SetupError::BadPattern {
                pattern: pattern.clone(),
                source,
            })?);
        }

        let authorship = serde_json::to_string(&serde_json::json!({
            "version_info": params.service_data.version_info,
        }))?;

        let fsctx = Arc::new(FsContext {
            service,
            caches: Arc::new(FsCaches::new(&params.config)),
            config: params.config,
            forbidden,
            shard_key,
            mountpoint: params.mountpoint,
            authorship,
            next_query_id: AtomicI64::new(1),
        });

        let mut root = Tree::new();
        root.add("service", service_tree(&fsctx, &params.service_data)?);
        root.add(
            "namespace",
            DynamicDir::new(
                Arc::new(NamespacesSource {
                    fsctx: fsctx.clone(),
                }),
                100,
            ),
        );

        let (entities, query) = namespace_nodes(&fsctx, String::new());
        root.add("entities", entities);
        root.add("query", query);

        Ok(Self {
            fsctx,
            root: root.into_node(),
        })
    }

    pub fn root(&self) -> NodeRef {
        self.root.clone()
    }

    pub fn caches(&self) -> &Arc<FsCaches> {
        &self.fsctx.caches
    }
}

/// The `entities` and `query` nodes for one namespace.
fn namespace_nodes(fsctx: &Arc<FsContext>, namespace: String) -> (NodeRef, NodeRef) {
    let set = Arc::new(AllEntities {
        fsctx: fsctx.clone(),
        namespace: namespace.clone(),
    });
    let entities = entities_node(fsctx.clone(), namespace.clone(), set, true);

    let query = DynamicDir::new(
        Arc::new(QueryDirSource {
            fsctx: fsctx.clone(),
            namespace,
        }),
        0, // query instances are never cached
    );

    (entities, query)
}

fn service_tree(fsctx: &Arc<FsContext>, data: &ServiceData) -> Result<NodeRef, SetupError> {
    let mut tree = Tree::new();

    if let Some(http) = &data.http_address {
        tree.add("http", StaticFile::string(format!("http://{http}")));
    }

    if let Some(grpc) = &data.grpc_address {
        let display = match (data.hostname.as_str(), grpc.rsplit_once(':')) {
            ("", _) | (_, None) => grpc.clone(),
            (hostname, Some((_, port))) => format!("{hostname}:{port}"),
        };
        tree.add("grpc", StaticFile::string(display));
    }

    if let Some(pem) = &data.server_cert_pem {
        tree.add("server_cert.pem", StaticFile::bytes(pem.clone()));
    }

    tree.add(
        "bad_filenames",
        StaticFile::string(fsctx.config.forbidden_filenames.join("\n")),
    );

    let startup_unix_nano = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    tree.add("startup", StaticFile::string(format!("{startup_unix_nano}")));

    let started = Instant::now();
    tree.add(
        "uptime",
        OnDemandFile::string(move |_ctx| {
            let elapsed = started.elapsed();
            async move { Ok(format!("{elapsed:?}")) }
        }),
    );

    let mut stats = Tree::new();
    stats.add(
        "heap_bytes",
        OnDemandFile::string(|_ctx| async { resident_data_bytes().map(|n| format!("{n}")) }),
    );
    tree.add("stats", stats.into_node());

    let service = fsctx.service.clone();
    tree.add(
        "last_changed",
        OnDemandFile::string(move |ctx| {
            let service = service.clone();
            async move {
                let metadata = service
                    .database_metadata(&ctx, true)
                    .await
                    .map_err(FsError::from)?;
                Ok(format!("{}", metadata.last_changed_unix_nano.unwrap_or(0)))
            }
        }),
    );

    tree.add("version.json", StaticFile::json(&data.version_info)?);
    tree.add("database_path", StaticFile::string(&data.database_path));
    tree.add("pid", StaticFile::string(format!("{}", std::process::id())));

    Ok(tree.into_node())
}

/// Resident data-segment size of this process, from /proc/self/statm.
fn resident_data_bytes() -> FsResult<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").map_err(|_| EIO)?;
    let pages: u64 = statm
        .split_whitespace()
        .nth(5)
        .and_then(|field| field.parse().ok())
        .ok_or(EIO)?;
    Ok(pages * 4096)
}

/// `namespace/`: one child per non-default namespace with active rows.
struct NamespacesSource {
    fsctx: Arc<FsContext>,
}

#[async_trait]
impl DirSource for NamespacesSource {
    async fn list(&self, ctx: &Ctx) -> FsResult<Vec<DirEntry>> {
        let namespaces = self.fsctx.service.list_namespaces(ctx).await?;
        Ok(namespaces
            .into_iter()
            .filter(|ns| !ns.is_empty())
            .map(|name| DirEntry {
                name,
                kind: EntryType::Dir,
            })
            .collect())
    }

    async fn get(&self, _ctx: &Ctx, name: &str) -> FsResult<LookupResult> {
        if !valid_filename(name) {
            return Err(ENOENT);
        }

        let (entities, query) = namespace_nodes(&self.fsctx, name.to_string());
        let mut tree = Tree::new();
        tree.add("entities", entities);
        tree.add("query", query);

        Ok(LookupResult {
            node: tree.into_node(),
            kind: EntryType::Dir,
            exists: true,
        })
    }
}

/// `query/`: querystring children materialize on lookup, each with a fresh
/// query instance ID. The listing is always empty.
struct QueryDirSource {
    fsctx: Arc<FsContext>,
    namespace: String,
}

#[async_trait]
impl DirSource for QueryDirSource {
    async fn list(&self, _ctx: &Ctx) -> FsResult<Vec<DirEntry>> {
        Ok(Vec::new())
    }

    async fn get(&self, _ctx: &Ctx, querystring: &str) -> FsResult<LookupResult> {
        let query = match facetfs_core::EntityQuery::parse(querystring) {
            Ok(query) => query,
            Err(err) => {
                tracing::error!(querystring = %querystring, error = %err, "bad query");
                return Err(EIO);
            }
        };

        let query_id = self.fsctx.next_query_id.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            namespace = %self.namespace,
            querystring = %querystring,
            query_id,
            "received query"
        );

        let set = Arc::new(QueryEntities {
            fsctx: self.fsctx.clone(),
            namespace: self.namespace.clone(),
            query,
            query_id,
        });

        Ok(LookupResult {
            node: entities_node(self.fsctx.clone(), self.namespace.clone(), set, false),
            kind: EntryType::Dir,
            exists: true,
        })
    }
}

/// One directory level inside an entity: direct children of `parent`.
struct EntityDirSource {
    fsctx: Arc<FsContext>,
    namespace: String,
    entity_id: String,
    parent: String,
}

impl EntityDirSource {
    fn full_path(&self, child: &str) -> String {
        if self.parent.is_empty() {
            child.to_string()
        } else {
            format!("{}/{child}", self.parent)
        }
    }

    fn direct_child<'a>(&self, path: &'a str) -> Option<&'a str> {
        let rest = if self.parent.is_empty() {
            path
        } else {
            path.strip_prefix(&self.parent)?.strip_prefix('/')?
        };
        (!rest.is_empty() && !rest.contains('/')).then_some(rest)
    }

    fn file_key(&self, child: &str) -> FileKey {
        FileKey::new(&self.namespace, &self.entity_id, &self.full_path(child))
    }
}

#[async_trait]
impl DirSource for EntityDirSource {
    async fn list(&self, ctx: &Ctx) -> FsResult<Vec<DirEntry>> {
        let files = match self
            .fsctx
            .service
            .get_entity(ctx, &self.namespace, &self.entity_id)
            .await
        {
            Ok(files) => files,
            // A fresh entity directory lists as empty.
            Err(err) if err.is_not_found() => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut entries = Vec::new();
        for (path, header) in &files {
            if let Some(name) = self.direct_child(path) {
                entries.push(DirEntry {
                    name: name.to_string(),
                    kind: if header.directory {
                        EntryType::Dir
                    } else {
                        EntryType::File
                    },
                });
            }
        }
        Ok(entries)
    }

    async fn get(&self, ctx: &Ctx, name: &str) -> FsResult<LookupResult> {
        if !valid_filename(name) {
            return Err(ENOENT);
        }
        if self.fsctx.is_filename_forbidden(name) {
            tracing::warn!(filename = %name, "refusing forbidden filename");
            return Err(EIO);
        }

        let key = self.file_key(name);
        let attribs = self.fsctx.file_attribs(ctx, &key).await?;

        if attribs.exists && attribs.directory {
            let node = DynamicDir::new(
                Arc::new(EntityDirSource {
                    fsctx: self.fsctx.clone(),
                    namespace: self.namespace.clone(),
                    entity_id: self.entity_id.clone(),
                    parent: self.full_path(name),
                }),
                0,
            );
            return Ok(LookupResult {
                node,
                kind: EntryType::Dir,
                exists: true,
            });
        }

        let node = AtomicFile::new(
            Arc::new(EntityFileBackend {
                fsctx: self.fsctx.clone(),
                key,
            }),
            self.fsctx.config.size_limit,
        );
        Ok(LookupResult {
            node,
            kind: EntryType::File,
            exists: attribs.exists,
        })
    }

    async fn create_dir(&self, ctx: &Ctx, name: &str) -> FsResult<()> {
        if !valid_filename(name) {
            return Err(EIO);
        }
        self.fsctx
            .write_through(ctx, &self.file_key(name), Vec::new(), String::new(), true)
            .await?;
        Ok(())
    }

    async fn delete(&self, ctx: &Ctx, name: &str, is_dir: bool) -> FsResult<()> {
        if !valid_filename(name) {
            return Err(ENOENT);
        }

        let key = self.file_key(name);
        let deletion_type = if is_dir {
            DeletionType::Dir
        } else {
            DeletionType::File
        };

        let result = self
            .fsctx
            .service
            .delete_file(
                ctx,
                DeleteRequest {
                    namespace: key.namespace.clone(),
                    entity_id: key.entity_id.clone(),
                    filename: key.filename.clone(),
                    old_revision_guid: String::new(),
                    deletion_type,
                },
            )
            .await;

        match result {
            Ok(_) => {
                self.fsctx.caches.invalidate(&key);
                Ok(())
            }
            Err(err) if err.is_not_found() => Err(ENOENT),
            Err(err) => {
                self.fsctx.caches.invalidate(&key);
                Err(err.into())
            }
        }
    }
}

/// Storage access for one attribute file, read and written through the
/// caches.
struct EntityFileBackend {
    fsctx: Arc<FsContext>,
    key: FileKey,
}

#[async_trait]
impl AtomicBackend for EntityFileBackend {
    async fn get_attr(&self, ctx: &Ctx) -> FsResult<(NodeAttr, bool)> {
        let attribs = self.fsctx.file_attribs(ctx, &self.key).await?;
        let attr = if attribs.directory {
            NodeAttr::dir()
        } else {
            NodeAttr::attribute_file(attribs.length)
        };
        Ok((attr, attribs.exists))
    }

    async fn read(&self, ctx: &Ctx) -> FsResult<(Vec<u8>, String, bool)> {
        let entry = self.fsctx.file_contents(ctx, &self.key).await?;
        Ok((entry.data, entry.row_guid, entry.exists))
    }

    async fn write(&self, ctx: &Ctx, data: Vec<u8>, revision: String) -> FsResult<String> {
        self.fsctx
            .write_through(ctx, &self.key, data, revision, false)
            .await
    }
}
