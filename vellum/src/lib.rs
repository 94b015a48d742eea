//! Declarative collection schemas and diff-based document versioning.
//!
//! This crate is the entry point of the vellum framework. It re-exports the core types
//! from `vellum-core` and the in-memory backend from `vellum-memory`.
//!
//! # Features
//!
//! - **Declarative collections** - Describe fields, links, virtuals and permissions in JSON
//! - **Validated definitions** - Every declaration problem is reported at once
//! - **Middleware** - Before/after hooks on create, read, update and delete
//! - **Document history** - Every write is versioned as a structural diff, deduplicated by content hash
//!
//! # Quick Start
//!
//! ```ignore
//! use vellum::{prelude::*, memory::InMemoryStore};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> DocumentStoreResult<()> {
//!     let factory = CollectionFactory::builder(InMemoryStore::new())
//!         .declaration("authors", json!({
//!             "singular": "Author",
//!             "fields": {
//!                 "name": { "label": "Name", "schemaType": "String" }
//!             }
//!         }))
//!         .declaration("posts", json!({
//!             "singular": "Post",
//!             "fields": {
//!                 "title": { "label": "Title", "schemaType": "String" },
//!                 "author": { "label": "Author", "schemaType": { "ref": "Author", "display": "name" } }
//!             }
//!         }))
//!         .build()?;
//!
//!     factory.register_all().await?;
//!
//!     let authors = factory.collection("authors").unwrap();
//!     let posts = factory.collection("posts").unwrap();
//!
//!     let ada = authors.create(doc! { "name": "Ada" }).await?;
//!     let post = posts.create(doc! { "title": "Hello", "author": ada.get("_id").cloned() }).await?;
//!
//!     let id = uuid_from_bson(post.get("_id").unwrap()).unwrap();
//!     posts.update_by_id(id, doc! { "title": "Hello, world" }).await?;
//!
//!     for entry in posts.versions().versions(id).await? {
//!         println!("{}: {:?}", entry.version.sequence, entry.state);
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Backends
//!
//! - [`memory`] - In-memory storage for development and testing

pub mod prelude;

pub use vellum_core::{
    backend, collection, config, definition, document, error, factory, field, loader, model, parser,
    permission, query, registry, store, types, version,
};

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage backend implementations.
pub mod memory {
    pub use vellum_memory::{InMemoryStore, InMemoryStoreBuilder};
}
