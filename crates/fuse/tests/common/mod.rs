//! Common test utilities: a composed filesystem over a real temp-file
//! store, plus node-level helpers mirroring shell operations.

use facetfs_core::FsConfig;
use facetfs_fuse::node::OpenFlags;
use facetfs_fuse::{Ctx, Facetfs, FileHandle, FsResult, Node, NodeRef, Params, ServiceData};
use facetfs_metadata::{MetadataService, SqliteStore, StoreOptions, WriteRequest};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

pub const MOUNTPOINT: &str = "/mnt/facetfs";

pub struct TestFs {
    pub dir: TempDir,
    pub db_path: PathBuf,
    pub store: Arc<SqliteStore>,
    pub fs: Facetfs,
}

pub async fn test_fs() -> TestFs {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("metadata.db");
    let store = Arc::new(
        SqliteStore::open(&db_path, StoreOptions::default())
            .await
            .expect("open store"),
    );
    let fs = build_fs(store.clone(), &db_path).await;
    TestFs {
        dir,
        db_path,
        store,
        fs,
    }
}

/// Stop the world and come back up on the same database file.
pub async fn reopen(previous: TestFs) -> TestFs {
    previous.store.close().await;
    let store = Arc::new(
        SqliteStore::open(&previous.db_path, StoreOptions::default())
            .await
            .expect("reopen store"),
    );
    let fs = build_fs(store.clone(), &previous.db_path).await;
    TestFs {
        dir: previous.dir,
        db_path: previous.db_path,
        store,
        fs,
    }
}

async fn build_fs(store: Arc<SqliteStore>, db_path: &std::path::Path) -> Facetfs {
    Facetfs::new(
        store,
        Params {
            service_data: ServiceData {
                hostname: "localhost".to_string(),
                database_path: db_path.display().to_string(),
                http_address: Some("127.0.0.1:8080".to_string()),
                grpc_address: Some("127.0.0.1:9090".to_string()),
                server_cert_pem: None,
                version_info: serde_json::json!({"package": "facetfs", "version": "test"}),
            },
            mountpoint: PathBuf::from(MOUNTPOINT),
            config: FsConfig::default(),
        },
    )
    .await
    .expect("build filesystem")
}

pub fn ctx() -> Ctx {
    Ctx::new()
}

/// Resolve a slash-separated path from the root.
pub async fn lookup_path(root: &NodeRef, path: &str) -> FsResult<NodeRef> {
    let mut node = root.clone();
    for component in path.split('/') {
        node = node.lookup(&ctx(), component).await?;
    }
    Ok(node)
}

/// `ls`: sorted child names.
pub async fn ls(node: &NodeRef) -> Vec<String> {
    let mut names: Vec<String> = node
        .read_dir_all(&ctx())
        .await
        .expect("readdir")
        .into_iter()
        .map(|entry| entry.name)
        .collect();
    names.sort();
    names
}

/// `echo data > dir/name`: create, write, close-with-flush.
pub async fn shell_write(dir: &NodeRef, name: &str, data: &[u8]) {
    try_shell_write(dir, name, data).await.expect("write");
}

pub async fn try_shell_write(dir: &NodeRef, name: &str, data: &[u8]) -> FsResult<()> {
    let ctx = ctx();
    let (_node, handle) = dir
        .create(
            &ctx,
            name,
            OpenFlags {
                truncate: true,
                write: true,
            },
        )
        .await?;
    handle.write(&ctx, 0, data).await?;
    handle.release(&ctx, true).await
}

/// `touch dir/name`.
pub async fn shell_touch(dir: &NodeRef, name: &str) {
    let ctx = ctx();
    let (_node, handle) = dir
        .create(
            &ctx,
            name,
            OpenFlags {
                truncate: false,
                write: true,
            },
        )
        .await
        .expect("create");
    handle.release(&ctx, true).await.expect("release");
}

/// `cat`: full contents through a fresh handle.
pub async fn shell_cat(file: &NodeRef) -> FsResult<Vec<u8>> {
    let ctx = ctx();
    let handle = file.open(&ctx, OpenFlags::default()).await?;
    let mut out = Vec::new();
    loop {
        let chunk = handle.read(&ctx, out.len() as u64, 1 << 16).await?;
        if chunk.is_empty() {
            break;
        }
        out.extend(chunk);
    }
    handle.release(&ctx, false).await?;
    Ok(out)
}

pub async fn cat_path(root: &NodeRef, path: &str) -> FsResult<Vec<u8>> {
    let node = lookup_path(root, path).await?;
    shell_cat(&node).await
}

/// Populate the Simpsons fixture straight through the storage service.
pub async fn populate_simpsons(store: &SqliteStore) {
    let people: &[(&str, &str, &str)] = &[
        ("homer", "Homer", "male"),
        ("marge", "Marge", "female"),
        ("bart", "Bart", "male"),
        ("lisa", "Lisa", "female"),
        ("maggie", "Maggie", "female"),
        ("ned", "Ned", "male"),
        ("itchy", "Itchy", "male"),
        ("scratchy", "Scratchy", "male"),
    ];

    for (id, firstname, sex) in people {
        store_write(store, "", id, "firstname", firstname.as_bytes()).await;
        store_write(store, "", id, "sex", sex.as_bytes()).await;
    }
    store_write(store, "", "ned", "religion", b"christian").await;
    store_write(store, "", "itchy", "fictional", b"").await;
    store_write(store, "", "scratchy", "fictional", b"").await;
}

pub async fn store_write(store: &SqliteStore, ns: &str, entity: &str, filename: &str, data: &[u8]) {
    store
        .write_file(
            &ctx(),
            WriteRequest {
                namespace: ns.to_string(),
                entity_id: entity.to_string(),
                filename: filename.to_string(),
                data: data.to_vec(),
                old_revision_guid: String::new(),
                directory: false,
                authorship: None,
            },
        )
        .await
        .expect("store write");
}
