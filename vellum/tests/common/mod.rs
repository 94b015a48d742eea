#![allow(dead_code)]

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{Value, json};
use vellum::{memory::InMemoryStore, prelude::*};

pub fn fixtures() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

pub fn authors() -> Value {
    json!({
        "singular": "Author",
        "fields": {
            "name": { "label": "Name", "schemaType": "String" },
            "email": { "label": "Email", "schemaType": "String" }
        },
        "defaultField": "name"
    })
}

pub fn posts() -> Value {
    json!({
        "singular": "Post",
        "fields": {
            "title": { "label": "Title", "schemaType": { "type": "String", "required": true } },
            "body": {
                "label": "Body",
                "schemaType": {
                    "intro": { "label": "Intro", "schemaType": "String" },
                    "words": { "label": "Words", "schemaType": "Number" }
                }
            },
            "tags": { "label": "Tags", "schemaType": ["String"] },
            "author": { "label": "Author", "schemaType": { "ref": "Author", "display": "name" } },
            "reviewers": { "label": "Reviewers", "schemaType": [{ "ref": "Author", "display": "name" }] }
        },
        "defaultField": "title",
        "permissions": { "read": "*", "write": ["admin"] }
    })
}

/// A factory with `authors` and `posts` registered on a fresh in-memory store.
pub async fn blog() -> CollectionFactory<InMemoryStore> {
    blog_with(InMemoryStore::new()).await
}

pub async fn blog_with<B>(backend: B) -> CollectionFactory<B>
where
    B: StoreBackend + Clone + 'static,
{
    let factory = CollectionFactory::builder(backend)
        .declaration("authors", authors())
        .declaration("posts", posts())
        .build()
        .unwrap();

    factory.register_all().await.unwrap();
    factory
}

pub fn id_of(document: &bson::Document) -> Uuid {
    document
        .get(ID_FIELD)
        .and_then(uuid_from_bson)
        .expect("document has an _id")
}

/// Delegates to an in-memory store, failing every insert into one collection.
#[derive(Debug, Clone, Default)]
pub struct FailingStore {
    inner: InMemoryStore,
    failing: String,
}

impl FailingStore {
    pub fn failing_inserts_into(collection: impl Into<String>) -> Self {
        Self {
            inner: InMemoryStore::new(),
            failing: collection.into(),
        }
    }
}

#[async_trait]
impl StoreBackend for FailingStore {
    async fn insert_documents(&self, documents: Vec<(Uuid, Bson)>, collection: &str) -> DocumentStoreResult<()> {
        if collection == self.failing {
            return Err(DocumentStoreError::Backend(format!("insert into {collection} refused")));
        }

        self.inner.insert_documents(documents, collection).await
    }

    async fn update_documents(&self, documents: Vec<(Uuid, Bson)>, collection: &str) -> DocumentStoreResult<()> {
        self.inner.update_documents(documents, collection).await
    }

    async fn delete_documents(&self, ids: Vec<Uuid>, collection: &str) -> DocumentStoreResult<()> {
        self.inner.delete_documents(ids, collection).await
    }

    async fn get_documents(&self, ids: Vec<Uuid>, collection: &str) -> DocumentStoreResult<Vec<Bson>> {
        self.inner.get_documents(ids, collection).await
    }

    async fn query_documents(&self, query: Query, collection: &str) -> DocumentStoreResult<Vec<Bson>> {
        self.inner.query_documents(query, collection).await
    }

    async fn create_collection(&self, name: &str) -> DocumentStoreResult<()> {
        self.inner.create_collection(name).await
    }

    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()> {
        self.inner.drop_collection(name).await
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        self.inner.list_collections().await
    }

    async fn register_schema(&self, collection: &str, schema: &Schema) -> DocumentStoreResult<()> {
        self.inner.register_schema(collection, schema).await
    }
}
