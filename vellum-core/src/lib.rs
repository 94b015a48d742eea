//! Declarative collection schemas and diff-based document versioning over a document
//! store.
//!
//! This crate is the core of the vellum project and provides:
//!
//! - **Field model** ([`field`], [`types`]) - Field definitions, storage shapes and named type presets
//! - **Collection definitions** ([`definition`], [`parser`]) - Validated, lockable collection declarations
//! - **Models and middleware** ([`model`]) - Schemas, virtual accessors and before/after hooks
//! - **Version control** ([`version`]) - Structural diffs, content hashes and history replay
//! - **Collections** ([`collection`], [`factory`]) - Definition-driven access to a store
//! - **Store backend abstraction** ([`backend`], [`query`], [`store`]) - The document store contract
//! - **Registries** ([`registry`]) - Links, catalog and custom types shared by an application
//! - **Configuration and loading** ([`config`], [`loader`]) - JSON configuration and declaration directories
//! - **Error handling** ([`error`]) - The crate-wide error and result types
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use serde_json::json;
//! use vellum_core::{collection::Collection, parser::DefinitionParser, registry::Registry};
//!
//! let registry = Arc::new(Registry::new());
//! let definition = DefinitionParser::new(&registry).parse(
//!     "posts",
//!     json!({
//!         "singular": "Post",
//!         "fields": {
//!             "title": { "label": "Title", "schemaType": "String" }
//!         }
//!     }),
//! )?;
//!
//! let posts = Collection::new(definition, store, registry)?;
//! posts.register().await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as vellum_core;

pub mod backend;
pub mod collection;
pub mod config;
pub mod definition;
pub mod document;
pub mod error;
pub mod factory;
pub mod field;
pub mod loader;
pub mod model;
pub mod parser;
pub mod permission;
pub mod query;
pub mod registry;
pub mod store;
pub mod types;
pub mod version;
