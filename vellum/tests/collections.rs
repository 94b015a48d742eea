mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use vellum::{memory::InMemoryStore, prelude::*};

use common::{authors, blog, id_of, posts};

#[tokio::test]
async fn create_assigns_an_id_and_reads_back() {
    let blog = blog().await;
    let posts = blog.collection("posts").unwrap();

    let created = posts
        .create(doc! { "title": "Hello", "tags": ["rust"] })
        .await
        .unwrap();
    let id = id_of(&created);

    assert_eq!(posts.read_by_id(id).await.unwrap(), Some(created));
    assert_eq!(posts.count(Query::new()).await.unwrap(), 1);
}

#[tokio::test]
async fn create_keeps_a_caller_supplied_id() {
    let blog = blog().await;
    let posts = blog.collection("posts").unwrap();
    let id = Uuid::new();

    let created = posts.create(doc! { "_id": id, "title": "Mine" }).await.unwrap();

    assert_eq!(id_of(&created), id);
    assert!(matches!(
        posts.create(doc! { "_id": id, "title": "Again" }).await,
        Err(DocumentStoreError::DocumentAlreadyExists(..))
    ));
}

#[tokio::test]
async fn reads_filter_sort_page_and_project() {
    let blog = blog().await;
    let posts = blog.collection("posts").unwrap();

    posts
        .insert_many(vec![
            doc! { "title": "b", "body": { "words": 200 }, "tags": ["rust"] },
            doc! { "title": "a", "body": { "words": 50 }, "tags": ["go"] },
            doc! { "title": "c", "body": { "words": 120 }, "tags": ["rust", "db"] },
        ])
        .await
        .unwrap();

    let long_reads = posts
        .read(
            Query::builder()
                .filter(Filter::gte("body.words", 100))
                .sort("title", SortDirection::Desc)
                .select(["title"])
                .build(),
        )
        .await
        .unwrap();

    let titles: Vec<&str> = long_reads
        .iter()
        .filter_map(|post| post.get_str("title").ok())
        .collect();
    assert_eq!(titles, vec!["c", "b"]);
    assert!(long_reads.iter().all(|post| post.contains_key(ID_FIELD)));
    assert!(long_reads.iter().all(|post| !post.contains_key("body")));

    let first_rust = posts
        .read_one(Query::filtered(Filter::contains("tags", "rust")))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first_rust.get_str("title").unwrap(), "b");

    assert_eq!(
        posts
            .count(Query::filtered(Filter::contains("tags", "rust")))
            .await
            .unwrap(),
        2
    );
}

#[tokio::test]
async fn update_by_id_sets_top_level_keys() {
    let blog = blog().await;
    let posts = blog.collection("posts").unwrap();

    let created = posts
        .create(doc! { "title": "Draft", "body": { "intro": "hi", "words": 10 }, "tags": ["a"] })
        .await
        .unwrap();
    let id = id_of(&created);

    let updated = posts
        .update_by_id(id, doc! { "title": "Final", "body": { "intro": "hello" }, "_id": Uuid::new() })
        .await
        .unwrap();

    assert_eq!(
        updated,
        doc! { "_id": id, "title": "Final", "body": { "intro": "hello" }, "tags": ["a"] }
    );
    assert_eq!(posts.read_by_id(id).await.unwrap(), Some(updated));

    assert!(matches!(
        posts.update_by_id(Uuid::new(), doc! { "title": "x" }).await,
        Err(DocumentStoreError::DocumentNotFound(..))
    ));
}

#[tokio::test]
async fn update_replaces_the_whole_collection() {
    let blog = blog().await;
    let posts = blog.collection("posts").unwrap();

    posts
        .insert_many(vec![doc! { "title": "old 1" }, doc! { "title": "old 2" }])
        .await
        .unwrap();
    let replaced = posts.update(vec![doc! { "title": "new" }]).await.unwrap();

    assert_eq!(replaced.len(), 1);
    assert_eq!(posts.read(Query::new()).await.unwrap(), replaced);
}

#[tokio::test]
async fn deletes_by_query_and_by_id() {
    let blog = blog().await;
    let posts = blog.collection("posts").unwrap();

    let created = posts
        .insert_many(vec![
            doc! { "title": "keep", "tags": ["a"] },
            doc! { "title": "drop", "tags": ["spam"] },
            doc! { "title": "drop too", "tags": ["spam"] },
        ])
        .await
        .unwrap();

    let deleted = posts
        .del(Query::filtered(Filter::contains("tags", "spam")))
        .await
        .unwrap();
    assert_eq!(deleted.len(), 2);

    let keep = id_of(&created[0]);
    assert_eq!(posts.del_by_id(keep).await.unwrap(), Some(created[0].clone()));
    assert_eq!(posts.del_by_id(keep).await.unwrap(), None);
    assert_eq!(posts.count(Query::new()).await.unwrap(), 0);
}

#[tokio::test]
async fn before_hooks_rewrite_records() {
    let blog = blog().await;
    let posts = blog.collection("posts").unwrap();

    posts.use_before(Operation::Create, |mut ctx: HookContext| async move {
        for record in &mut ctx.records {
            let slug = record
                .body()
                .get_str("title")
                .unwrap_or_default()
                .to_lowercase()
                .replace(' ', "-");
            record.body_mut().insert("slug", slug);
        }

        Ok::<_, DocumentStoreError>(ctx)
    });

    let created = posts.create(doc! { "title": "Hello World" }).await.unwrap();

    assert_eq!(created.get_str("slug").unwrap(), "hello-world");
    assert_eq!(
        posts.read_by_id(id_of(&created)).await.unwrap().unwrap().get_str("slug").unwrap(),
        "hello-world"
    );
}

#[tokio::test]
async fn failing_before_hook_prevents_the_write() {
    let blog = blog().await;
    let posts = blog.collection("posts").unwrap();

    posts
        .attach_named_hook("pre", "create", |ctx: HookContext| async move {
            if ctx.records.iter().any(|record| record.get("title").is_none()) {
                return Err(DocumentStoreError::InvalidDocument("title is required".into()));
            }

            Ok(ctx)
        })
        .unwrap();

    let err = posts.create(doc! { "body": { "intro": "no title" } }).await.unwrap_err();

    assert_eq!(err.to_string(), "Invalid document: title is required");
    assert_eq!(posts.count(Query::new()).await.unwrap(), 0);
}

#[tokio::test]
async fn failing_after_hook_does_not_roll_back() {
    let blog = blog().await;
    let posts = blog.collection("posts").unwrap();

    posts.use_after(Operation::Create, |_ctx: HookContext| async move {
        Err::<HookContext, DocumentStoreError>(DocumentStoreError::Unknown("notify failed".into()))
    });

    assert!(posts.create(doc! { "title": "stored anyway" }).await.is_err());
    assert_eq!(posts.count(Query::new()).await.unwrap(), 1);
}

#[tokio::test]
async fn before_read_hooks_rewrite_the_query() {
    let blog = blog().await;
    let posts = blog.collection("posts").unwrap();

    posts
        .insert_many(vec![
            doc! { "title": "public", "tags": ["published"] },
            doc! { "title": "hidden", "tags": ["draft"] },
        ])
        .await
        .unwrap();

    posts.use_before(Operation::Read, |mut ctx: HookContext| async move {
        let mut query = ctx.query.take().unwrap_or_default();
        let published = Filter::contains("tags", "published");
        query.filter = Some(match query.filter.take() {
            Some(filter) => filter.and(published),
            None => published,
        });
        ctx.query = Some(query);

        Ok::<_, DocumentStoreError>(ctx)
    });

    let visible = posts.read(Query::new()).await.unwrap();

    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].get_str("title").unwrap(), "public");
}

#[tokio::test]
async fn unknown_hook_names_are_rejected() {
    let blog = blog().await;
    let posts = blog.collection("posts").unwrap();
    let noop = |ctx: HookContext| async move { Ok::<_, DocumentStoreError>(ctx) };

    let err = posts.attach_named_hook("during", "create", noop).unwrap_err();
    assert_eq!(err.to_string(), r#"Must include "pre" or "post" when attaching a hook"#);

    assert!(matches!(
        posts.attach_named_hook("post", "upsert", noop),
        Err(DocumentStoreError::InvalidHook(_))
    ));
}

#[tokio::test]
async fn virtuals_are_computed_on_read_and_consumed_on_write() {
    let getter: VirtualGetter = Arc::new(|document: &bson::Document| {
        let first = document.get_str("first").unwrap_or_default();
        let last = document.get_str("last").unwrap_or_default();
        Bson::String(format!("{first} {last}").trim().to_string())
    });
    let setter: VirtualSetter = Arc::new(|document: &mut bson::Document, value: Bson| {
        if let Bson::String(full) = value {
            let (first, last) = full.split_once(' ').unwrap_or((full.as_str(), ""));
            document.insert("first", first);
            document.insert("last", last);
        }
    });

    let factory = CollectionFactory::builder(InMemoryStore::new())
        .declaration(
            "people",
            Declaration::new(serde_json::json!({
                "singular": "Person",
                "fields": {
                    "first": { "label": "First", "schemaType": "String" },
                    "last": { "label": "Last", "schemaType": "String" }
                }
            }))
            .with_getter("fullName", getter)
            .with_setter("fullName", setter),
        )
        .build()
        .unwrap();
    factory.register_all().await.unwrap();
    let people = factory.collection("people").unwrap();

    let created = people.create(doc! { "fullName": "Ada Lovelace" }).await.unwrap();
    assert_eq!(created.get_str("fullName").unwrap(), "Ada Lovelace");

    let id = id_of(&created);
    let stored = factory
        .backend()
        .get_documents(vec![id], "people")
        .await
        .unwrap();
    assert_eq!(
        stored,
        vec![Bson::Document(doc! { "_id": id, "first": "Ada", "last": "Lovelace" })]
    );

    let renamed = people
        .update_by_id(id, doc! { "fullName": "Ada King" })
        .await
        .unwrap();
    assert_eq!(renamed.get_str("last").unwrap(), "King");
    assert_eq!(renamed.get_str("fullName").unwrap(), "Ada King");
    assert_eq!(people.model().schema().virtuals, vec!["fullName".to_string()]);
}

#[tokio::test]
async fn populated_reads_replace_linked_ids() {
    let blog = blog().await;
    let authors = blog.collection("authors").unwrap();
    let posts = blog.collection("posts").unwrap();

    let ada = authors.create(doc! { "name": "Ada" }).await.unwrap();
    let grace = authors.create(doc! { "name": "Grace" }).await.unwrap();
    let missing = Uuid::new();

    posts
        .create(doc! {
            "title": "Linked",
            "author": id_of(&ada),
            "reviewers": [id_of(&grace), missing],
        })
        .await
        .unwrap();

    let plain = posts.read(Query::new()).await.unwrap();
    assert_eq!(plain[0].get("author").and_then(uuid_from_bson), Some(id_of(&ada)));

    let populated = posts.read_populated(Query::new()).await.unwrap();
    let post = &populated[0];

    assert_eq!(post.get_document("author").unwrap(), &ada);
    let reviewers = post.get_array("reviewers").unwrap();
    assert_eq!(reviewers[0], Bson::Document(grace));
    assert_eq!(uuid_from_bson(&reviewers[1]), Some(missing));
}

#[tokio::test]
async fn linked_options_list_every_linked_field() {
    let blog = blog().await;
    let authors = blog.collection("authors").unwrap();
    let posts = blog.collection("posts").unwrap();

    let ada = authors
        .create(doc! { "name": "Ada", "email": "ada@example.com" })
        .await
        .unwrap();

    let options = posts.linked_options().await.unwrap();

    assert_eq!(
        options.iter().map(|linked| linked.field.as_str()).collect::<Vec<_>>(),
        vec!["author", "reviewers"]
    );
    assert_eq!(
        options[0].options,
        vec![Bson::Document(doc! { "_id": id_of(&ada), "name": "Ada" })]
    );
}

#[tokio::test]
async fn linked_reads_pass_through_the_target_read_hooks() {
    let blog = blog().await;
    let authors = blog.collection("authors").unwrap();
    let posts = blog.collection("posts").unwrap();

    let ada = authors.create(doc! { "name": "Ada" }).await.unwrap();
    let grace = authors
        .create(doc! { "name": "Grace", "retired": true })
        .await
        .unwrap();

    authors.use_before(Operation::Read, |mut ctx: HookContext| async move {
        let mut query = ctx.query.take().unwrap_or_default();
        let active = Filter::ne("retired", true);
        query.filter = Some(match query.filter.take() {
            Some(filter) => filter.and(active),
            None => active,
        });
        ctx.query = Some(query);

        Ok::<_, DocumentStoreError>(ctx)
    });

    posts
        .create(doc! {
            "title": "Notes",
            "author": id_of(&grace),
            "reviewers": [id_of(&ada), id_of(&grace)],
        })
        .await
        .unwrap();

    let options = posts.linked_options().await.unwrap();
    assert_eq!(
        options[0].options,
        vec![Bson::Document(doc! { "_id": id_of(&ada), "name": "Ada" })]
    );

    let populated = posts.read_populated(Query::new()).await.unwrap();
    let post = &populated[0];

    assert_eq!(post.get("author").and_then(uuid_from_bson), Some(id_of(&grace)));
    let reviewers = post.get_array("reviewers").unwrap();
    assert_eq!(reviewers[0], Bson::Document(ada));
    assert_eq!(uuid_from_bson(&reviewers[1]), Some(id_of(&grace)));
}

#[tokio::test]
async fn register_hands_the_schema_to_the_store() {
    let blog = blog().await;
    let schema = blog.backend().schema("posts").await.unwrap();

    assert_eq!(schema.model, "Post");
    assert_eq!(
        schema.paths.keys().cloned().collect::<Vec<_>>(),
        vec!["author", "body", "reviewers", "tags", "title"]
    );

    let mut collections = blog.backend().list_collections().await.unwrap();
    collections.sort();
    assert_eq!(collections, vec!["authors", "posts", "versions"]);
}

#[tokio::test]
async fn permissions_come_from_the_declaration() {
    let blog = blog().await;
    let posts = blog.collection("posts").unwrap();
    let authors = blog.collection("authors").unwrap();

    assert!(posts.can_user_read("guest"));
    assert!(posts.can_user_write("admin"));
    assert!(!posts.can_user_write("guest"));
    assert!(authors.can_user_write("guest"));
}

#[tokio::test]
async fn a_collection_can_be_bound_without_a_factory() {
    let store = InMemoryStore::new();
    let registry = Arc::new(Registry::new());

    let definition = DefinitionParser::new(&registry).parse("authors", authors()).unwrap();
    let authors = Collection::new(definition, store.clone(), registry.clone()).unwrap();
    authors.register().await.unwrap();

    assert_eq!(authors.model_name(), "Author");
    assert!(authors.definition().is_locked());
    assert_eq!(registry.catalog().by_model_name("Author").unwrap().name, "authors");

    let mut definition = DefinitionParser::new(&registry).parse("posts", posts()).unwrap();
    definition.build_model().unwrap();
    assert!(matches!(
        Collection::new(definition, store, registry),
        Err(DocumentStoreError::Locked(_))
    ));
}
