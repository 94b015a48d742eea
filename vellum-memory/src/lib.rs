//! In-memory document storage backend for vellum.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreBackend`
//! trait. It backs the test suites and suits applications that do not bring a database.
//!
//! # Features
//!
//! - **Shared state** - Clones share one store through async-aware read-write locks
//! - **Insertion order** - Unsorted queries return documents in the order they were inserted
//! - **Dot-path queries** - Filters, sorts and projections reach into nested documents
//! - **Schema registry** - Registered collection schemas can be read back
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use vellum_core::{collection::Collection, parser::DefinitionParser, registry::Registry};
//! use vellum_memory::InMemoryStore;
//!
//! let store = InMemoryStore::new();
//! let registry = Arc::new(Registry::new());
//! let definition = DefinitionParser::new(&registry).parse("posts", declaration)?;
//!
//! let posts = Collection::new(definition, store.clone(), registry)?;
//! posts.register().await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as vellum_memory;

pub mod evaluator;
pub mod store;

pub use store::{InMemoryStore, InMemoryStoreBuilder};
