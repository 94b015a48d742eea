//! Materialized models and their middleware pipelines.
//!
//! Building a [`CollectionDefinition`](crate::definition::CollectionDefinition) produces a
//! [`Model`]: the [`Schema`] handed to the store, the virtual accessors, and a
//! [`Pipeline`] of before/after middleware per [`Operation`].
//!
//! Middleware in one list runs strictly in attachment order, each awaiting the previous
//! one. The first error aborts the rest of the chain and is returned to the caller of
//! the operation. A failing before-hook means the store is never touched; a failing
//! after-hook is reported after the write has already been committed.
//!
//! ```ignore
//! model.use_before(Operation::Create, |mut ctx: HookContext| async move {
//!     for record in &mut ctx.records {
//!         record.body_mut().insert("slug", slugify(record.get("title")));
//!     }
//!     Ok::<_, DocumentStoreError>(ctx)
//! });
//! ```

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    future::Future,
    str::FromStr,
    sync::Arc,
};

use async_trait::async_trait;
use bson::Bson;
use parking_lot::RwLock;
use serde_json::Value;

use crate::{
    document::Record,
    error::{DocumentStoreError, DocumentStoreResult},
    field::SchemaType,
    query::Query,
};

/// Lifecycle operations that carry middleware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Read => "read",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = DocumentStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "create" | "save" => Ok(Operation::Create),
            "read" | "find" => Ok(Operation::Read),
            "update" => Ok(Operation::Update),
            "delete" | "remove" => Ok(Operation::Delete),
            _ => Err(DocumentStoreError::InvalidHook(format!("Unknown hook operation `{s}`"))),
        }
    }
}

/// When a middleware runs relative to the store call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HookPhase {
    Before,
    After,
}

impl FromStr for HookPhase {
    type Err = DocumentStoreError;

    /// Accepts `before`/`pre` and `after`/`post`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "before" | "pre" => Ok(HookPhase::Before),
            "after" | "post" => Ok(HookPhase::After),
            _ => Err(DocumentStoreError::InvalidHook(
                r#"Must include "pre" or "post" when attaching a hook"#.to_string(),
            )),
        }
    }
}

/// What a middleware sees and may rewrite.
///
/// Before a write, `records` are the documents about to be stored. After a write or a
/// read, they are the documents as stored or returned. Read hooks also see the query;
/// before-read hooks may rewrite it.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub operation: Operation,
    pub collection: String,
    pub records: Vec<Record>,
    pub query: Option<Query>,
}

impl HookContext {
    pub fn new(operation: Operation, collection: impl Into<String>, records: Vec<Record>) -> Self {
        Self {
            operation,
            collection: collection.into(),
            records,
            query: None,
        }
    }

    pub fn with_query(mut self, query: Query) -> Self {
        self.query = Some(query);
        self
    }
}

/// An interception point on a model operation.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, context: HookContext) -> DocumentStoreResult<HookContext>;
}

#[async_trait]
impl<F, Fut> Middleware for F
where
    F: Fn(HookContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = DocumentStoreResult<HookContext>> + Send + 'static,
{
    async fn handle(&self, context: HookContext) -> DocumentStoreResult<HookContext> {
        (self)(context).await
    }
}

pub type MiddlewareRef = Arc<dyn Middleware>;

/// Ordered middleware lists keyed by phase and operation.
#[derive(Default)]
pub struct Pipeline {
    hooks: RwLock<HashMap<(HookPhase, Operation), Vec<MiddlewareRef>>>,
}

impl Pipeline {
    pub fn attach(&self, phase: HookPhase, operation: Operation, middleware: MiddlewareRef) {
        self.hooks
            .write()
            .entry((phase, operation))
            .or_default()
            .push(middleware);
    }

    /// Number of middleware attached for `phase` and `operation`.
    pub fn len(&self, phase: HookPhase, operation: Operation) -> usize {
        self.hooks
            .read()
            .get(&(phase, operation))
            .map_or(0, Vec::len)
    }

    /// Runs the chain for `phase` and `operation` over `context`.
    ///
    /// The chain is snapshotted first, so middleware attached while it runs applies to
    /// the next call only.
    pub async fn run(
        &self,
        phase: HookPhase,
        operation: Operation,
        mut context: HookContext,
    ) -> DocumentStoreResult<HookContext> {
        let chain = self
            .hooks
            .read()
            .get(&(phase, operation))
            .cloned()
            .unwrap_or_default();

        if !chain.is_empty() {
            tracing::debug!(
                collection = %context.collection,
                %operation,
                ?phase,
                middleware = chain.len(),
                "running middleware chain"
            );
        }

        for middleware in chain {
            context = middleware.handle(context).await?;
        }

        Ok(context)
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hooks = self.hooks.read();

        f.debug_map()
            .entries(hooks.iter().map(|(key, chain)| (key, chain.len())))
            .finish()
    }
}

/// Computes a virtual value from a stored document.
pub type VirtualGetter = Arc<dyn Fn(&bson::Document) -> Bson + Send + Sync>;
/// Writes a virtual value into the document about to be stored.
pub type VirtualSetter = Arc<dyn Fn(&mut bson::Document, Bson) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VirtualKind {
    Get,
    Set,
}

#[derive(Clone, Default)]
struct VirtualPath {
    getter: Option<VirtualGetter>,
    setter: Option<VirtualSetter>,
}

/// Computed, non-stored properties keyed by path.
#[derive(Clone, Default)]
pub struct Virtuals {
    paths: BTreeMap<String, VirtualPath>,
}

impl Virtuals {
    pub fn add_getter(&mut self, path: impl Into<String>, getter: VirtualGetter) {
        self.paths.entry(path.into()).or_default().getter = Some(getter);
    }

    pub fn add_setter(&mut self, path: impl Into<String>, setter: VirtualSetter) {
        self.paths.entry(path.into()).or_default().setter = Some(setter);
    }

    /// Removes one accessor of `path`, dropping the path once it has none.
    pub fn remove(&mut self, path: &str, kind: VirtualKind) {
        if let Some(entry) = self.paths.get_mut(path) {
            match kind {
                VirtualKind::Get => entry.getter = None,
                VirtualKind::Set => entry.setter = None,
            }

            if entry.getter.is_none() && entry.setter.is_none() {
                self.paths.remove(path);
            }
        }
    }

    pub fn has(&self, path: &str, kind: VirtualKind) -> bool {
        self.paths.get(path).is_some_and(|entry| match kind {
            VirtualKind::Get => entry.getter.is_some(),
            VirtualKind::Set => entry.setter.is_some(),
        })
    }

    pub fn paths(&self) -> Vec<String> {
        self.paths.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Adds every getter's value to `document`.
    pub fn apply_getters(&self, document: &mut bson::Document) {
        for (path, entry) in &self.paths {
            if let Some(getter) = &entry.getter {
                let value = getter(document);
                document.insert(path.clone(), value);
            }
        }
    }

    /// Feeds virtual values present in `document` to their setters.
    ///
    /// Values under a path with a getter but no setter are dropped, since they are
    /// computed on read and never stored.
    pub fn apply_setters(&self, document: &mut bson::Document) {
        for (path, entry) in &self.paths {
            if let Some(value) = document.remove(path) {
                if let Some(setter) = &entry.setter {
                    setter(document, value);
                }
            }
        }
    }
}

impl fmt::Debug for Virtuals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.paths.keys()).finish()
    }
}

/// Field shape a collection's documents follow, handed to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    /// Model (singular) name.
    pub model: String,
    /// Top-level field shapes.
    pub paths: BTreeMap<String, SchemaType>,
    /// Virtual paths, computed and never stored.
    pub virtuals: Vec<String>,
}

impl Schema {
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.paths
                .iter()
                .map(|(path, shape)| (path.clone(), shape.to_json()))
                .collect(),
        )
    }
}

/// A locked collection definition made usable: schema, virtuals and middleware.
#[derive(Debug)]
pub struct Model {
    name: String,
    collection: String,
    schema: Schema,
    virtuals: Virtuals,
    pipeline: Pipeline,
}

impl Model {
    pub(crate) fn new(name: String, collection: String, schema: Schema, virtuals: Virtuals) -> Self {
        Self {
            name,
            collection,
            schema,
            virtuals,
            pipeline: Pipeline::default(),
        }
    }

    /// The model (singular) name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The store collection backing the model.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn virtuals(&self) -> &Virtuals {
        &self.virtuals
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn attach(&self, phase: HookPhase, operation: Operation, middleware: MiddlewareRef) {
        self.pipeline.attach(phase, operation, middleware);
    }

    pub fn use_before(&self, operation: Operation, middleware: impl Middleware + 'static) {
        self.attach(HookPhase::Before, operation, Arc::new(middleware));
    }

    pub fn use_after(&self, operation: Operation, middleware: impl Middleware + 'static) {
        self.attach(HookPhase::After, operation, Arc::new(middleware));
    }

    pub async fn run_before(&self, operation: Operation, context: HookContext) -> DocumentStoreResult<HookContext> {
        self.pipeline
            .run(HookPhase::Before, operation, context)
            .await
    }

    pub async fn run_after(&self, operation: Operation, context: HookContext) -> DocumentStoreResult<HookContext> {
        self.pipeline
            .run(HookPhase::After, operation, context)
            .await
    }
}
