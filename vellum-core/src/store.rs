//! Borrowed collection handles over a storage backend.
//!
//! - [`RawCollection`] works with BSON documents directly.
//! - [`TypedCollection`] serializes and deserializes a [`Document`] type.
//!
//! Both are cheap views: a collection name plus a backend reference. Higher layers
//! (definition-driven [`crate::collection::Collection`]s, the version log) build them on
//! demand.
//!
//! ```ignore
//! use vellum::store::RawCollection;
//!
//! let posts = RawCollection::new("posts", &backend);
//! let all = posts.query(Query::new()).await?;
//! ```

use bson::{Bson, Uuid};
use std::marker::PhantomData;

use crate::{
    backend::StoreBackend,
    document::{Document, DocumentExt},
    error::DocumentStoreResult,
    query::Query,
};

/// An untyped collection with a reference to a storage backend.
#[derive(Debug)]
pub struct RawCollection<'a, B: StoreBackend> {
    name: String,
    backend: &'a B,
}

impl<'a, B: StoreBackend> RawCollection<'a, B> {
    pub fn new(name: impl Into<String>, backend: &'a B) -> Self {
        Self { name: name.into(), backend }
    }

    /// Returns the name of this collection.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Inserts new documents into the collection.
    ///
    /// # Errors
    ///
    /// Returns a [`DocumentStoreError`](crate::error::DocumentStoreError) if the operation fails.
    pub async fn insert(&self, documents: Vec<(Uuid, Bson)>) -> DocumentStoreResult<()> {
        self.backend
            .insert_documents(documents, self.name())
            .await
    }

    /// Replaces existing documents in the collection.
    pub async fn update(&self, documents: Vec<(Uuid, Bson)>) -> DocumentStoreResult<()> {
        self.backend
            .update_documents(documents, self.name())
            .await
    }

    /// Deletes documents from the collection by their IDs.
    pub async fn delete<U>(&self, ids: Vec<U>) -> DocumentStoreResult<()>
    where
        U: Into<Uuid> + Send + Sync + 'static,
    {
        self.backend
            .delete_documents(
                ids.into_iter()
                    .map(Into::into)
                    .collect(),
                self.name(),
            )
            .await
    }

    /// Retrieves documents from the collection by their IDs.
    ///
    /// Missing ids are omitted from the result.
    pub async fn get<U>(&self, ids: Vec<U>) -> DocumentStoreResult<Vec<Bson>>
    where
        U: Into<Uuid> + Send + Sync + 'static,
    {
        self.backend
            .get_documents(
                ids.into_iter()
                    .map(Into::into)
                    .collect(),
                self.name(),
            )
            .await
    }

    /// Queries documents in the collection.
    pub async fn query(&self, query: Query) -> DocumentStoreResult<Vec<Bson>> {
        self.backend
            .query_documents(query, self.name())
            .await
    }

    pub async fn count(&self, query: Query) -> DocumentStoreResult<usize> {
        self.backend
            .count_documents(query, self.name())
            .await
    }

    /// Removes every document by dropping and recreating the collection.
    pub async fn clear(&self) -> DocumentStoreResult<()> {
        if self
            .backend
            .list_collections()
            .await?
            .iter()
            .any(|name| name == self.name())
        {
            self.backend.drop_collection(self.name()).await?;
        }

        self.backend.create_collection(self.name()).await
    }
}

/// A type-safe collection for documents of type `D`.
#[derive(Debug)]
pub struct TypedCollection<'a, B: StoreBackend, D: Document> {
    name: String,
    backend: &'a B,
    _marker: PhantomData<D>,
}

impl<'a, B: StoreBackend, D: Document> TypedCollection<'a, B, D> {
    /// Creates a handle on the document type's default collection.
    pub fn new(backend: &'a B) -> Self {
        Self::named(D::collection_name(), backend)
    }

    /// Creates a handle on a differently named collection holding `D`s.
    pub fn named(name: impl Into<String>, backend: &'a B) -> Self {
        Self { name: name.into(), backend, _marker: PhantomData }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Inserts new documents into the collection.
    ///
    /// # Errors
    ///
    /// Returns a [`DocumentStoreError`](crate::error::DocumentStoreError) if serialization or insertion fails.
    pub async fn insert(&self, documents: Vec<D>) -> DocumentStoreResult<()> {
        self.backend
            .insert_documents(
                documents
                    .into_iter()
                    .map(|d| {
                        d.to_bson()
                            .map(move |b| (*d.id(), b))
                    })
                    .collect::<Result<Vec<(Uuid, Bson)>, _>>()?,
                self.name(),
            )
            .await
    }

    /// Retrieves documents by id.
    pub async fn get(&self, ids: Vec<Uuid>) -> DocumentStoreResult<Vec<D>> {
        self.backend
            .get_documents(ids, self.name())
            .await?
            .into_iter()
            .map(D::from_bson)
            .collect()
    }

    /// Queries documents in the collection.
    pub async fn query(&self, query: Query) -> DocumentStoreResult<Vec<D>> {
        self.backend
            .query_documents(query, self.name())
            .await?
            .into_iter()
            .map(D::from_bson)
            .collect()
    }

    pub async fn count(&self, query: Query) -> DocumentStoreResult<usize> {
        self.backend
            .count_documents(query, self.name())
            .await
    }
}
