//! Common test utilities and fixtures.

use facetfs_metadata::{
    DeleteRequest, DeletionType, EntityStream, FileHeader, MetadataService, QueryKind, SqliteStore,
    WriteRequest,
};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

pub fn cancel() -> CancellationToken {
    CancellationToken::new()
}

pub async fn memory_store() -> SqliteStore {
    SqliteStore::in_memory().await.expect("in-memory store")
}

pub async fn write(
    store: &SqliteStore,
    namespace: &str,
    entity_id: &str,
    filename: &str,
    data: &[u8],
) -> FileHeader {
    store
        .write_file(
            &cancel(),
            WriteRequest {
                namespace: namespace.to_string(),
                entity_id: entity_id.to_string(),
                filename: filename.to_string(),
                data: data.to_vec(),
                old_revision_guid: String::new(),
                directory: false,
                authorship: None,
            },
        )
        .await
        .expect("write")
}

pub async fn mkdir(store: &SqliteStore, namespace: &str, entity_id: &str, filename: &str) {
    store
        .write_file(
            &cancel(),
            WriteRequest {
                namespace: namespace.to_string(),
                entity_id: entity_id.to_string(),
                filename: filename.to_string(),
                data: Vec::new(),
                old_revision_guid: String::new(),
                directory: true,
                authorship: None,
            },
        )
        .await
        .expect("mkdir");
}

pub async fn delete(
    store: &SqliteStore,
    namespace: &str,
    entity_id: &str,
    filename: &str,
    deletion_type: DeletionType,
) {
    store
        .delete_file(
            &cancel(),
            DeleteRequest {
                namespace: namespace.to_string(),
                entity_id: entity_id.to_string(),
                filename: filename.to_string(),
                old_revision_guid: String::new(),
                deletion_type,
            },
        )
        .await
        .expect("delete");
}

pub async fn collect(mut stream: EntityStream) -> Vec<String> {
    let mut entities = Vec::new();
    while let Some(item) = stream.next().await {
        entities.push(item.expect("stream item"));
    }
    entities
}

pub async fn run_query(store: &SqliteStore, namespace: &str, querystring: &str) -> Vec<String> {
    let query = facetfs_core::EntityQuery::parse(querystring).expect("parse query");
    collect(store.query_entities(cancel(), namespace.to_string(), QueryKind::Parsed(query))).await
}

/// The Simpsons fixture: eight entities in the default namespace.
///
/// - everyone has `firstname`
/// - `sex=male` matches five entities
/// - `religion` exists on one entity
/// - `fictional` exists on two entities
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
        write(store, "", id, "firstname", firstname.as_bytes()).await;
        write(store, "", id, "sex", sex.as_bytes()).await;
    }

    write(store, "", "ned", "religion", b"christian").await;
    write(store, "", "itchy", "fictional", b"").await;
    write(store, "", "scratchy", "fictional", b"").await;
}
