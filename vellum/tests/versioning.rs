mod common;

use futures::future::join_all;
use pretty_assertions::assert_eq;
use serde_json::json;
use vellum::{memory::InMemoryStore, prelude::*, version::hash_document};

use common::{FailingStore, blog, blog_with, id_of};

#[tokio::test]
async fn every_write_appends_a_version() {
    let blog = blog().await;
    let posts = blog.collection("posts").unwrap();

    let created = posts.create(doc! { "title": "v1", "tags": ["a"] }).await.unwrap();
    let id = id_of(&created);
    posts.update_by_id(id, doc! { "title": "v2" }).await.unwrap();
    posts.update_by_id(id, doc! { "tags": ["a", "b"] }).await.unwrap();

    let versions = posts.versions();
    assert_eq!(versions.count_versions(id).await.unwrap(), 3);

    let history = versions.versions(id).await.unwrap();
    let sequences: Vec<i64> = history.iter().map(|entry| entry.version.sequence).collect();
    assert_eq!(sequences, vec![3, 2, 1]);

    assert_eq!(history[0].state, posts.read_by_id(id).await.unwrap().unwrap());
    assert_eq!(history[2].state, created);
    assert_eq!(history[0].version.hash, hash_document(&history[0].state));
}

#[tokio::test]
async fn unchanged_writes_are_deduplicated() {
    let blog = blog().await;
    let posts = blog.collection("posts").unwrap();

    let created = posts.create(doc! { "title": "same", "count": 1 }).await.unwrap();
    let id = id_of(&created);

    posts.update_by_id(id, doc! { "title": "same" }).await.unwrap();
    posts.update_by_id(id, doc! { "count": 1.0 }).await.unwrap();

    assert_eq!(posts.versions().count_versions(id).await.unwrap(), 1);
}

#[tokio::test]
async fn diffs_describe_each_step() {
    let blog = blog().await;
    let posts = blog.collection("posts").unwrap();

    let created = posts
        .create(doc! { "title": "a", "body": { "intro": "hi" }, "tags": ["x", "y"] })
        .await
        .unwrap();
    let id = id_of(&created);
    posts
        .update_by_id(id, doc! { "title": "b", "tags": ["x"] })
        .await
        .unwrap();

    let latest = posts.versions().latest_diff(id).await.unwrap().unwrap();
    let mut paths: Vec<(ChangeKind, String)> = latest
        .changes
        .iter()
        .map(|change| (change.kind, change.dotted_path()))
        .collect();
    paths.sort_by(|a, b| a.1.cmp(&b.1));

    assert_eq!(
        paths,
        vec![(ChangeKind::Delete, "tags.1".to_string()), (ChangeKind::Update, "title".to_string())]
    );

    let diffs = posts.versions().diffs(id).await.unwrap();
    assert_eq!(diffs.len(), 2);
    assert_eq!(diffs[1], latest);
    assert_eq!(posts.versions().version_diff(latest.id).await.unwrap(), Some(latest));
    assert_eq!(posts.versions().version_diff(Uuid::new()).await.unwrap(), None);
}

#[tokio::test]
async fn a_version_diff_holds_only_its_own_step() {
    let blog = blog().await;
    let posts = blog.collection("posts").unwrap();

    let created = posts.create(doc! { "title": "a", "count": 0 }).await.unwrap();
    let id = id_of(&created);
    posts.update_by_id(id, doc! { "count": 1 }).await.unwrap();
    posts.update_by_id(id, doc! { "title": "b" }).await.unwrap();
    posts.update_by_id(id, doc! { "count": 2 }).await.unwrap();

    let second_update = posts.versions().diffs(id).await.unwrap()[2].clone();
    let diff = posts
        .versions()
        .version_diff(second_update.id)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(
        diff.changes,
        vec![Change::update(
            vec![PathSegment::Key("title".to_string())],
            Bson::from("a"),
            Bson::from("b"),
        )]
    );
}

#[tokio::test]
async fn the_first_listed_version_is_the_latest() {
    let blog = blog().await;
    let posts = blog.collection("posts").unwrap();

    let created = posts.create(doc! { "title": "one" }).await.unwrap();
    let id = id_of(&created);
    posts.update_by_id(id, doc! { "title": "two" }).await.unwrap();

    let versions = posts.versions().versions(id).await.unwrap();
    let latest = posts.versions().latest(id).await.unwrap();

    assert_eq!(versions.into_iter().next(), latest);
}

#[tokio::test]
async fn any_version_can_be_reconstructed() {
    let blog = blog().await;
    let posts = blog.collection("posts").unwrap();

    let first = posts.create(doc! { "title": "one" }).await.unwrap();
    let id = id_of(&first);
    let second = posts
        .update_by_id(id, doc! { "body": { "intro": "two" } })
        .await
        .unwrap();
    posts.update_by_id(id, doc! { "title": "three" }).await.unwrap();

    let history = posts.versions().diffs(id).await.unwrap();

    let as_of_first = posts.versions().version(id, history[0].id).await.unwrap();
    let as_of_second = posts.versions().version(id, history[1].id).await.unwrap();

    assert_eq!(as_of_first.state, first);
    assert_eq!(as_of_second.state, second);

    let other_document = Uuid::new();
    assert!(matches!(
        posts.versions().version(other_document, history[0].id).await,
        Err(DocumentStoreError::VersionNotFound(..))
    ));
}

#[tokio::test]
async fn restoring_appends_a_new_version() {
    let blog = blog().await;
    let posts = blog.collection("posts").unwrap();

    let original = posts
        .create(doc! { "title": "original", "tags": ["keep"] })
        .await
        .unwrap();
    let id = id_of(&original);
    posts
        .update_by_id(id, doc! { "title": "edited", "slug": "edited" })
        .await
        .unwrap();

    let first = posts.versions().diffs(id).await.unwrap()[0].id;
    let restored = posts.restore_version(id, first).await.unwrap();

    assert_eq!(restored.sequence, 3);
    assert_eq!(posts.read_by_id(id).await.unwrap(), Some(original.clone()));
    assert_eq!(posts.versions().count_versions(id).await.unwrap(), 3);

    let latest = posts.versions().latest(id).await.unwrap().unwrap();
    assert_eq!(latest.state, original);
    assert_eq!(latest.version.hash, posts.versions().diffs(id).await.unwrap()[0].hash);
}

#[tokio::test]
async fn restoring_the_current_state_adds_nothing() {
    let blog = blog().await;
    let posts = blog.collection("posts").unwrap();

    let created = posts.create(doc! { "title": "only" }).await.unwrap();
    let id = id_of(&created);
    let first = posts.versions().diffs(id).await.unwrap()[0].id;

    let restored = posts.restore_version(id, first).await.unwrap();

    assert_eq!(restored.id, first);
    assert_eq!(posts.versions().count_versions(id).await.unwrap(), 1);
}

#[tokio::test]
async fn concurrent_writes_keep_sequences_contiguous() {
    let blog = blog().await;
    let posts = blog.collection("posts").unwrap();

    let created = posts.create(doc! { "title": "start", "count": 0 }).await.unwrap();
    let id = id_of(&created);

    let updates = (1..=8).map(|count| posts.update_by_id(id, doc! { "count": count }));
    for result in join_all(updates).await {
        result.unwrap();
    }

    let sequences: Vec<i64> = posts
        .versions()
        .diffs(id)
        .await
        .unwrap()
        .iter()
        .map(|version| version.sequence)
        .collect();

    assert!(sequences.len() > 1);
    assert_eq!(sequences, (1..=sequences.len() as i64).collect::<Vec<_>>());
}

#[tokio::test]
async fn unversioned_collections_keep_no_history() {
    let factory = CollectionFactory::builder(InMemoryStore::new())
        .declaration(
            "sessions",
            json!({
                "singular": "Session",
                "fields": { "token": { "label": "Token", "schemaType": "String" } },
                "versioned": false
            }),
        )
        .build()
        .unwrap();
    factory.register_all().await.unwrap();
    let sessions = factory.collection("sessions").unwrap();

    let created = sessions.create(doc! { "token": "abc" }).await.unwrap();

    assert_eq!(sessions.versions().count_versions(id_of(&created)).await.unwrap(), 0);
}

#[tokio::test]
async fn versions_can_live_in_a_custom_collection() {
    let store = InMemoryStore::new();
    let factory = CollectionFactory::builder(store.clone())
        .config(Config::builder().versions_collection("history").build())
        .declaration("authors", common::authors())
        .build()
        .unwrap();
    factory.register_all().await.unwrap();

    let created = factory
        .collection("authors")
        .unwrap()
        .create(doc! { "name": "Ada" })
        .await
        .unwrap();

    let stored = store
        .query_documents(Query::new(), "history")
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(factory.versions().count_versions(id_of(&created)).await.unwrap(), 1);
    assert!(store.query_documents(Query::new(), "versions").await.unwrap().is_empty());
}

#[tokio::test]
async fn version_write_failures_surface_after_commit() {
    let blog = blog_with(FailingStore::failing_inserts_into("versions")).await;
    let posts = blog.collection("posts").unwrap();

    let err = posts.create(doc! { "title": "committed" }).await.unwrap_err();

    assert!(matches!(err, DocumentStoreError::Backend(_)));
    assert_eq!(posts.count(Query::new()).await.unwrap(), 1);
}
