//! In-memory storage implementation of the store contract.
//!
//! Documents are kept as BSON per collection in insertion order behind async-aware
//! read-write locks. Queries scan the whole collection.

use std::{
    cmp::Ordering,
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
};

use async_trait::async_trait;
use bson::{Bson, Uuid};
use mea::rwlock::RwLock;

use vellum_core::{
    backend::{StoreBackend, StoreBackendBuilder},
    document::lookup_path,
    error::{DocumentStoreError, DocumentStoreResult},
    model::Schema,
    query::{Query, SortDirection},
};

use crate::evaluator::{DocumentEvaluator, comparable_at};

/// Documents of one collection, in insertion order.
#[derive(Debug, Default)]
struct CollectionState {
    next_position: u64,
    documents: BTreeMap<u64, Bson>,
    positions: HashMap<Uuid, u64>,
}

impl CollectionState {
    fn contains(&self, id: &Uuid) -> bool {
        self.positions.contains_key(id)
    }

    fn get(&self, id: &Uuid) -> Option<&Bson> {
        self.positions
            .get(id)
            .and_then(|position| self.documents.get(position))
    }

    fn insert(&mut self, id: Uuid, document: Bson) {
        let position = self.next_position;
        self.next_position += 1;

        self.positions.insert(id, position);
        self.documents.insert(position, document);
    }

    fn replace(&mut self, id: &Uuid, document: Bson) {
        if let Some(position) = self.positions.get(id) {
            self.documents.insert(*position, document);
        }
    }

    fn remove(&mut self, id: &Uuid) {
        if let Some(position) = self.positions.remove(id) {
            self.documents.remove(&position);
        }
    }

    fn documents(&self) -> impl Iterator<Item = &Bson> {
        self.documents.values()
    }
}

type StoreMap = BTreeMap<String, CollectionState>;

/// Thread-safe in-memory document storage backend.
///
/// `InMemoryStore` is cloneable and every clone shares the same data, so one instance
/// can back any number of collections and tasks.
///
/// Inserts create missing collections on the fly. Updates and deletes fail with
/// [`DocumentStoreError::CollectionNotFound`] on a missing collection, and every write
/// validates its whole batch before changing anything.
///
/// # Example
///
/// ```ignore
/// use vellum_memory::InMemoryStore;
/// use vellum_core::backend::StoreBackend;
/// use bson::{Uuid, Bson, doc};
///
/// let store = InMemoryStore::new();
///
/// let id = Uuid::new();
/// store.insert_documents(vec![(id, Bson::Document(doc! { "_id": id, "name": "Alice" }))], "users").await?;
///
/// let docs = store.get_documents(vec![id], "users").await?;
/// assert_eq!(docs.len(), 1);
/// ```
#[derive(Default, Clone, Debug)]
pub struct InMemoryStore {
    collections: Arc<RwLock<StoreMap>>,
    schemas: Arc<RwLock<HashMap<String, Schema>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }

    /// The schema last registered for `collection`.
    pub async fn schema(&self, collection: &str) -> Option<Schema> {
        self.schemas.read().await.get(collection).cloned()
    }
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    async fn insert_documents(&self, documents: Vec<(Uuid, Bson)>, collection: &str) -> DocumentStoreResult<()> {
        let mut store = self.collections.write().await;
        let state = store.entry(collection.to_string()).or_default();

        let mut incoming = HashSet::with_capacity(documents.len());
        for (id, _) in &documents {
            if state.contains(id) || !incoming.insert(*id) {
                return Err(DocumentStoreError::DocumentAlreadyExists(
                    id.to_string(),
                    collection.to_string(),
                ));
            }
        }

        for (id, document) in documents {
            state.insert(id, document);
        }

        Ok(())
    }

    async fn update_documents(&self, documents: Vec<(Uuid, Bson)>, collection: &str) -> DocumentStoreResult<()> {
        let mut store = self.collections.write().await;
        let state = store
            .get_mut(collection)
            .ok_or_else(|| DocumentStoreError::CollectionNotFound(collection.to_string()))?;

        if let Some((id, _)) = documents.iter().find(|(id, _)| !state.contains(id)) {
            return Err(DocumentStoreError::DocumentNotFound(id.to_string(), collection.to_string()));
        }

        for (id, document) in documents {
            state.replace(&id, document);
        }

        Ok(())
    }

    async fn delete_documents(&self, ids: Vec<Uuid>, collection: &str) -> DocumentStoreResult<()> {
        let mut store = self.collections.write().await;
        let state = store
            .get_mut(collection)
            .ok_or_else(|| DocumentStoreError::CollectionNotFound(collection.to_string()))?;

        if let Some(id) = ids.iter().find(|id| !state.contains(id)) {
            return Err(DocumentStoreError::DocumentNotFound(id.to_string(), collection.to_string()));
        }

        for id in &ids {
            state.remove(id);
        }

        Ok(())
    }

    async fn get_documents(&self, ids: Vec<Uuid>, collection: &str) -> DocumentStoreResult<Vec<Bson>> {
        let store = self.collections.read().await;
        let Some(state) = store.get(collection) else {
            return Ok(Vec::new());
        };

        Ok(ids
            .iter()
            .filter_map(|id| state.get(id))
            .cloned()
            .collect())
    }

    async fn query_documents(&self, query: Query, collection: &str) -> DocumentStoreResult<Vec<Bson>> {
        let store = self.collections.read().await;
        let Some(state) = store.get(collection) else {
            return Ok(Vec::new());
        };

        let mut documents = match &query.filter {
            Some(filter) => DocumentEvaluator::filter_documents(state.documents(), filter),
            None => state.documents().collect(),
        };

        if let Some(sort) = &query.sort {
            documents.sort_by(|a, b| {
                let left = comparable_at(a, &sort.field);
                let right = comparable_at(b, &sort.field);

                match sort.direction {
                    SortDirection::Asc => left.partial_cmp(&right).unwrap_or(Ordering::Equal),
                    SortDirection::Desc => right.partial_cmp(&left).unwrap_or(Ordering::Equal),
                }
            });
        }

        Ok(documents
            .into_iter()
            .skip(query.offset.unwrap_or(0))
            .take(query.limit.unwrap_or(usize::MAX))
            .map(|document| match &query.select {
                Some(paths) => project(document, paths),
                None => document.clone(),
            })
            .collect())
    }

    async fn count_documents(&self, query: Query, collection: &str) -> DocumentStoreResult<usize> {
        let store = self.collections.read().await;
        let Some(state) = store.get(collection) else {
            return Ok(0);
        };

        let matching = match &query.filter {
            Some(filter) => DocumentEvaluator::filter_documents(state.documents(), filter).len(),
            None => state.documents.len(),
        };

        Ok(matching
            .saturating_sub(query.offset.unwrap_or(0))
            .min(query.limit.unwrap_or(usize::MAX)))
    }

    async fn create_collection(&self, name: &str) -> DocumentStoreResult<()> {
        self.collections
            .write()
            .await
            .entry(name.to_string())
            .or_default();

        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()> {
        if self.collections.write().await.remove(name).is_none() {
            return Err(DocumentStoreError::CollectionNotFound(name.to_string()));
        }

        Ok(())
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        Ok(self.collections.read().await.keys().cloned().collect())
    }

    async fn register_schema(&self, collection: &str, schema: &Schema) -> DocumentStoreResult<()> {
        self.schemas
            .write()
            .await
            .insert(collection.to_string(), schema.clone());

        tracing::debug!(collection, paths = schema.paths.len(), "registered schema");

        Ok(())
    }
}

/// Copies only the values at `paths` into a new document, keeping their nesting.
fn project(document: &Bson, paths: &[String]) -> Bson {
    let Some(source) = document.as_document() else {
        return document.clone();
    };

    let mut projected = bson::Document::new();
    for path in paths {
        if let Some(value) = lookup_path(source, path) {
            insert_path(&mut projected, path, value.clone());
        }
    }

    Bson::Document(projected)
}

fn insert_path(target: &mut bson::Document, path: &str, value: Bson) {
    match path.split_once('.') {
        None => {
            target.insert(path, value);
        }
        Some((head, rest)) => {
            if !matches!(target.get(head), Some(Bson::Document(_))) {
                target.insert(head, bson::Document::new());
            }
            if let Ok(inner) = target.get_document_mut(head) {
                insert_path(inner, rest, value);
            }
        }
    }
}

/// Builder for [`InMemoryStore`] instances.
#[derive(Default)]
pub struct InMemoryStoreBuilder;

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        Ok(InMemoryStore::new())
    }
}
