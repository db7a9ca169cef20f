//! Integration tests for streaming entity queries.

mod common;

use common::{cancel, collect, delete, memory_store, populate_simpsons, run_query, write};
use facetfs_core::EntityQuery;
use facetfs_metadata::{DeletionType, MetadataError, MetadataService, QueryKind};
use futures::StreamExt;

#[tokio::test]
async fn all_entities_in_namespace_sorted() {
    let store = memory_store().await;
    populate_simpsons(&store).await;

    let all = collect(store.query_entities(cancel(), String::new(), QueryKind::All)).await;
    assert_eq!(all.len(), 8);
    let mut sorted = all.clone();
    sorted.sort();
    assert_eq!(all, sorted);
}

#[tokio::test]
async fn all_entities_excludes_other_namespaces() {
    let store = memory_store().await;
    write(&store, "", "here", "a", b"1").await;
    write(&store, "other", "there", "a", b"1").await;

    let all = collect(store.query_entities(cancel(), String::new(), QueryKind::All)).await;
    assert_eq!(all, vec!["here"]);
}

#[tokio::test]
async fn deleted_entities_disappear_from_all() {
    let store = memory_store().await;
    write(&store, "", "e", "only", b"1").await;
    delete(&store, "", "e", "only", DeletionType::File).await;

    let all = collect(store.query_entities(cancel(), String::new(), QueryKind::All)).await;
    assert!(all.is_empty());
}

#[tokio::test]
async fn has_filename_filters() {
    let store = memory_store().await;
    populate_simpsons(&store).await;

    let religious = collect(store.query_entities(
        cancel(),
        String::new(),
        QueryKind::HasFilename("religion".into()),
    ))
    .await;
    assert_eq!(religious, vec!["ned"]);
}

#[tokio::test]
async fn has_filename_rejects_empty() {
    let store = memory_store().await;
    let mut stream = store.query_entities(
        cancel(),
        String::new(),
        QueryKind::HasFilename(String::new()),
    );
    let err = stream.next().await.unwrap().unwrap_err();
    assert!(matches!(err, MetadataError::InvalidArgument(_)));
}

#[tokio::test]
async fn query_by_existence() {
    let store = memory_store().await;
    populate_simpsons(&store).await;

    assert_eq!(run_query(&store, "", "religion").await.len(), 1);
    assert_eq!(run_query(&store, "", "-religion").await.len(), 7);
}

#[tokio::test]
async fn query_by_content() {
    let store = memory_store().await;
    populate_simpsons(&store).await;

    assert_eq!(run_query(&store, "", "sex=male").await.len(), 5);
    assert_eq!(run_query(&store, "", "sex=female").await.len(), 3);
    assert_eq!(run_query(&store, "", "-sex=male").await.len(), 3);
}

#[tokio::test]
async fn compound_query() {
    let store = memory_store().await;
    populate_simpsons(&store).await;

    assert_eq!(
        run_query(&store, "", "fictional,firstname=Scratchy").await,
        vec!["scratchy"]
    );
    assert!(run_query(&store, "", "fictional,firstname=Scrotchy")
        .await
        .is_empty());
}

#[tokio::test]
async fn content_query_is_whitespace_insensitive() {
    let store = memory_store().await;
    write(&store, "", "e", "greeting", b"  hello  \n").await;

    assert_eq!(run_query(&store, "", "greeting=hello").await, vec!["e"]);
    // A value with whitespace edges matches the same trimmed bytes.
    assert_eq!(
        run_query(&store, "", "greeting=%20hello%20").await,
        vec!["e"]
    );
    assert!(run_query(&store, "", "greeting=goodbye").await.is_empty());
}

#[tokio::test]
async fn blank_matches_whitespace_only_files() {
    let store = memory_store().await;
    write(&store, "", "padded", "notes", b"   \n").await;
    write(&store, "", "empty", "notes", b"").await;
    write(&store, "", "full", "notes", b"text").await;

    let mut blank = run_query(&store, "", "blank[notes]").await;
    blank.sort();
    assert_eq!(blank, vec!["empty", "padded"]);

    let nonblank = run_query(&store, "", "-blank[notes]").await;
    assert_eq!(nonblank, vec!["full"]);
}

#[tokio::test]
async fn negation_complements_within_namespace() {
    let store = memory_store().await;
    populate_simpsons(&store).await;

    let all = collect(store.query_entities(cancel(), String::new(), QueryKind::All)).await;
    let matching = run_query(&store, "", "sex=male").await;
    let complement = run_query(&store, "", "-sex=male").await;

    let mut union = matching.clone();
    union.extend(complement.clone());
    union.sort();
    assert_eq!(union, all);
    assert!(matching.iter().all(|e| !complement.contains(e)));
}

#[tokio::test]
async fn entity_id_restriction_selects_exactly_one() {
    let store = memory_store().await;
    populate_simpsons(&store).await;

    let query = EntityQuery::parse("sex=male").unwrap().with_entity_id("bart");
    let result = collect(store.query_entities(
        cancel(),
        String::new(),
        QueryKind::Parsed(query),
    ))
    .await;
    assert_eq!(result, vec!["bart"]);

    let query = EntityQuery::parse("sex=male")
        .unwrap()
        .with_entity_id("marge");
    let result = collect(store.query_entities(
        cancel(),
        String::new(),
        QueryKind::Parsed(query),
    ))
    .await;
    assert!(result.is_empty());
}

#[tokio::test]
async fn shard_restriction_agrees_with_shard_function() {
    let store = memory_store().await;
    populate_simpsons(&store).await;

    let key = store.sharding_key().to_vec();
    let (shard1, shard2) = facetfs_core::shard::shard(&key, "homer");

    let query = EntityQuery::default().with_shards(&[shard1.clone(), shard2]);
    let result = collect(store.query_entities(
        cancel(),
        String::new(),
        QueryKind::Parsed(query),
    ))
    .await;
    assert!(result.contains(&"homer".to_string()));
    for entity in &result {
        let (s1, _) = facetfs_core::shard::shard(&key, entity);
        assert_eq!(s1, shard1);
    }
}

#[tokio::test]
async fn random_query_streams_unimplemented() {
    let store = memory_store().await;
    let query = EntityQuery::parse("random[5]").unwrap();
    let mut stream = store.query_entities(cancel(), String::new(), QueryKind::Parsed(query));
    let err = stream.next().await.unwrap().unwrap_err();
    assert!(matches!(err, MetadataError::Unimplemented(_)));
}

#[tokio::test]
async fn cancellation_stops_stream_between_rows() {
    let store = memory_store().await;
    for i in 0..50 {
        write(&store, "", &format!("entity{i:03}"), "a", b"x").await;
    }

    let token = cancel();
    let mut stream = store.query_entities(token.clone(), String::new(), QueryKind::All);

    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first, "entity000");

    token.cancel();
    let err = stream.next().await.unwrap().unwrap_err();
    assert!(matches!(err, MetadataError::Cancelled));
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn list_cardinality_matches_entity_count() {
    let store = memory_store().await;
    for i in 0..143 {
        write(&store, "", &format!("entity{i:03}"), "present", b"1").await;
    }

    let listed = collect(store.query_entities(
        cancel(),
        String::new(),
        QueryKind::Parsed(EntityQuery::parse("present").unwrap()),
    ))
    .await;
    assert_eq!(listed.len(), 143);
}
