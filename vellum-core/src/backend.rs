//! Storage backend abstraction consumed by collections and the version log.
//!
//! This module defines the contract a document store must satisfy for definition-driven
//! collections to run on top of it: insert, replace, delete and fetch documents by id,
//! query by filter, manage collections, and accept a schema description derived from a
//! collection definition.
//!
//! # Traits
//!
//! - [`StoreBackend`]: The core trait for storage backends
//! - [`StoreBackendBuilder`]: Factory trait for creating backend instances
//!
//! # Examples
//!
//! ```ignore
//! use vellum::backend::StoreBackend;
//! use bson::{Uuid, Bson, doc};
//!
//! let backend = MyBackendImpl::new();
//!
//! let id = Uuid::new();
//! let doc = Bson::Document(doc! { "_id": id, "title": "Hello" });
//! backend.insert_documents(vec![(id, doc)], "posts").await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use async_trait::async_trait;
use bson::{Bson, Uuid};
use std::{fmt::Debug, sync::Arc};

use crate::{error::DocumentStoreResult, model::Schema, query::Query};

/// Abstract interface for document storage backends.
///
/// # Thread Safety
///
/// All implementations must be thread-safe and support concurrent access from multiple
/// async tasks.
///
/// # Ordering
///
/// Queries without a sort must return documents in insertion order. The version log
/// relies on this as its creation sequence when it reads back a document's history.
///
/// # Error Handling
///
/// Operations return [`DocumentStoreResult<T>`](crate::error::DocumentStoreResult).
/// Failures are propagated to callers unmodified; nothing above this trait retries.
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Inserts new documents into a collection.
    ///
    /// # Arguments
    ///
    /// * `documents` - A vector of (UUID, BSON document) pairs to insert
    /// * `collection` - The name of the collection to insert into. Created automatically if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentAlreadyExists`](crate::error::DocumentStoreError::DocumentAlreadyExists)
    /// if an id is already present.
    async fn insert_documents(
        &self,
        documents: Vec<(Uuid, Bson)>,
        collection: &str,
    ) -> DocumentStoreResult<()>;

    /// Replaces existing documents in a collection.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentNotFound`](crate::error::DocumentStoreError::DocumentNotFound)
    /// if any id is absent.
    async fn update_documents(
        &self,
        documents: Vec<(Uuid, Bson)>,
        collection: &str,
    ) -> DocumentStoreResult<()>;

    /// Deletes documents from a collection by their IDs.
    async fn delete_documents(&self, ids: Vec<Uuid>, collection: &str) -> DocumentStoreResult<()>;

    /// Retrieves documents from a collection by their IDs.
    ///
    /// Missing ids are omitted from the result.
    async fn get_documents(
        &self,
        ids: Vec<Uuid>,
        collection: &str,
    ) -> DocumentStoreResult<Vec<Bson>>;

    /// Queries documents in a collection using a structured query.
    ///
    /// # See Also
    ///
    /// - [`Query`] for constructing queries
    /// - [`crate::query::Filter`] for building filter expressions
    async fn query_documents(
        &self,
        query: Query,
        collection: &str,
    ) -> DocumentStoreResult<Vec<Bson>>;

    /// Counts the documents matching a query.
    async fn count_documents(&self, query: Query, collection: &str) -> DocumentStoreResult<usize> {
        Ok(self
            .query_documents(query, collection)
            .await?
            .len())
    }

    /// Creates an empty collection. Creating an existing collection is a no-op.
    async fn create_collection(&self, name: &str) -> DocumentStoreResult<()>;

    /// Drops a collection and all its documents.
    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()>;

    /// Lists the names of all collections in the store.
    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>>;

    /// Registers the field shape a collection's documents are expected to follow.
    ///
    /// Registering again replaces the previous schema.
    async fn register_schema(&self, collection: &str, schema: &Schema) -> DocumentStoreResult<()>;

    /// Cleanly shuts down the backend, releasing all resources.
    async fn shutdown(self) -> DocumentStoreResult<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

#[async_trait]
impl<B> StoreBackend for &B
where
    B: StoreBackend,
{
    async fn insert_documents(
        &self,
        documents: Vec<(Uuid, Bson)>,
        collection: &str,
    ) -> DocumentStoreResult<()> {
        (*self)
            .insert_documents(documents, collection)
            .await
    }

    async fn update_documents(
        &self,
        documents: Vec<(Uuid, Bson)>,
        collection: &str,
    ) -> DocumentStoreResult<()> {
        (*self)
            .update_documents(documents, collection)
            .await
    }

    async fn delete_documents(&self, ids: Vec<Uuid>, collection: &str) -> DocumentStoreResult<()> {
        (*self)
            .delete_documents(ids, collection)
            .await
    }

    async fn get_documents(
        &self,
        ids: Vec<Uuid>,
        collection: &str,
    ) -> DocumentStoreResult<Vec<Bson>> {
        (*self)
            .get_documents(ids, collection)
            .await
    }

    async fn query_documents(
        &self,
        query: Query,
        collection: &str,
    ) -> DocumentStoreResult<Vec<Bson>> {
        (*self)
            .query_documents(query, collection)
            .await
    }

    async fn count_documents(&self, query: Query, collection: &str) -> DocumentStoreResult<usize> {
        (*self)
            .count_documents(query, collection)
            .await
    }

    async fn create_collection(&self, name: &str) -> DocumentStoreResult<()> {
        (*self).create_collection(name).await
    }

    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()> {
        (*self).drop_collection(name).await
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        (*self).list_collections().await
    }

    async fn register_schema(&self, collection: &str, schema: &Schema) -> DocumentStoreResult<()> {
        (*self)
            .register_schema(collection, schema)
            .await
    }
}

#[async_trait]
impl<B> StoreBackend for Arc<B>
where
    B: StoreBackend,
{
    async fn insert_documents(
        &self,
        documents: Vec<(Uuid, Bson)>,
        collection: &str,
    ) -> DocumentStoreResult<()> {
        (**self)
            .insert_documents(documents, collection)
            .await
    }

    async fn update_documents(
        &self,
        documents: Vec<(Uuid, Bson)>,
        collection: &str,
    ) -> DocumentStoreResult<()> {
        (**self)
            .update_documents(documents, collection)
            .await
    }

    async fn delete_documents(&self, ids: Vec<Uuid>, collection: &str) -> DocumentStoreResult<()> {
        (**self)
            .delete_documents(ids, collection)
            .await
    }

    async fn get_documents(
        &self,
        ids: Vec<Uuid>,
        collection: &str,
    ) -> DocumentStoreResult<Vec<Bson>> {
        (**self)
            .get_documents(ids, collection)
            .await
    }

    async fn query_documents(
        &self,
        query: Query,
        collection: &str,
    ) -> DocumentStoreResult<Vec<Bson>> {
        (**self)
            .query_documents(query, collection)
            .await
    }

    async fn count_documents(&self, query: Query, collection: &str) -> DocumentStoreResult<usize> {
        (**self)
            .count_documents(query, collection)
            .await
    }

    async fn create_collection(&self, name: &str) -> DocumentStoreResult<()> {
        (**self).create_collection(name).await
    }

    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()> {
        (**self).drop_collection(name).await
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        (**self).list_collections().await
    }

    async fn register_schema(&self, collection: &str, schema: &Schema) -> DocumentStoreResult<()> {
        (**self)
            .register_schema(collection, schema)
            .await
    }
}

/// Factory trait for backends that need asynchronous setup.
#[async_trait]
pub trait StoreBackendBuilder {
    type Backend: StoreBackend;

    async fn build(self) -> DocumentStoreResult<Self::Backend>;
}
