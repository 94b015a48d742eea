//! Convenient re-exports of commonly used types from vellum.
//!
//! ```ignore
//! use vellum::prelude::*;
//! ```
//!
//! This provides access to:
//! - Collections, the factory and configuration
//! - Definitions, the parser and field types
//! - Models, middleware and virtual accessors
//! - Version control
//! - Store backends and queries
//! - Error types

pub use bson::{Bson, Uuid, doc};

pub use vellum_core::{
    backend::{StoreBackend, StoreBackendBuilder},
    collection::Collection,
    config::{Config, ConfigBuilder},
    definition::{CollectionDefinition, LinkedOptions, VirtualAccessor},
    document::{Document, DocumentExt, ID_FIELD, Record, lookup_path, uuid_from_bson},
    error::{DefinitionError, DocumentStoreError, DocumentStoreResult},
    factory::{CollectionFactory, CollectionFactoryBuilder},
    field::{FieldDefinition, FieldSpec, FieldType, Reference, SchemaType},
    loader::{DefinitionLoader, TypeLoader},
    model::{HookContext, HookPhase, Middleware, Model, Operation, Schema, VirtualGetter, VirtualSetter},
    parser::{Declaration, DefinitionParser},
    permission::{DeclaredPermissions, Permission, Permissions},
    query::{Expr, FieldOp, Filter, Query, QueryBuilder, QueryVisitor, Sort, SortDirection},
    registry::{CollectionReader, Registry, RegistryCheckpoint},
    store::{RawCollection, TypedCollection},
    types::{Primitive, TypeLibrary, TypeSpec},
    version::{Change, ChangeKind, DocumentHandle, PathSegment, Version, VersionControl, VersionState},
};
