//! Definition-driven collections bound to a store.
//!
//! A [`Collection`] ties a locked [`CollectionDefinition`] and its [`Model`] to a
//! [`StoreBackend`]. Every operation goes through the model's middleware:
//!
//! 1. virtual setters consume virtual values from incoming bodies,
//! 2. before-middleware may rewrite or reject the records (or, for reads, the query),
//! 3. the store is called,
//! 4. after-middleware sees the stored records,
//! 5. virtual getters decorate what is returned to the caller.
//!
//! Versioned collections carry an after-middleware on create and update that appends
//! the stored state of each record to the version log.
//!
//! # Example
//!
//! ```ignore
//! let registry = Arc::new(Registry::new());
//! let definition = DefinitionParser::new(&registry).parse("posts", declaration)?;
//! let posts = Collection::new(definition, store.clone(), registry.clone())?;
//! posts.register().await?;
//!
//! let post = posts.create(doc! { "title": "Hello" }).await?;
//! let id = uuid_from_bson(post.get("_id").unwrap()).unwrap();
//! posts.update_by_id(id, doc! { "title": "Hello again" }).await?;
//!
//! assert_eq!(posts.versions().count_versions(id).await?, 2);
//! ```

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use bson::{Bson, Uuid};

use crate::{
    backend::StoreBackend,
    definition::{CollectionDefinition, LinkedOptions, read_linked},
    document::{ID_FIELD, Record, uuid_from_bson},
    error::{DocumentStoreError, DocumentStoreResult},
    model::{HookContext, HookPhase, Middleware, Model, Operation},
    permission::Permissions,
    query::{Filter, Query},
    registry::{CollectionReader, Registry},
    store::RawCollection,
    version::{DocumentHandle, Version, VersionControl},
};

/// A collection definition bound to a live store.
#[derive(Debug, Clone)]
pub struct Collection<B: StoreBackend> {
    definition: Arc<CollectionDefinition>,
    model: Arc<Model>,
    backend: B,
    registry: Arc<Registry>,
    versions: VersionControl<B>,
    reads: ReadPipeline<B>,
}

impl<B> Collection<B>
where
    B: StoreBackend + Clone + 'static,
{
    /// Builds the model of `definition` and binds it to `backend`, keeping versions in
    /// the default `versions` collection.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Locked`] if the definition's model was already built.
    pub fn new(definition: CollectionDefinition, backend: B, registry: Arc<Registry>) -> DocumentStoreResult<Self> {
        let versions = VersionControl::new(backend.clone());
        Self::with_versions(definition, backend, registry, versions)
    }

    /// Like [`new`](Self::new), sharing an existing version log.
    pub fn with_versions(
        mut definition: CollectionDefinition,
        backend: B,
        registry: Arc<Registry>,
        versions: VersionControl<B>,
    ) -> DocumentStoreResult<Self> {
        let model = definition.build_model()?;

        if definition.is_versioned() {
            for operation in [Operation::Create, Operation::Update] {
                model.use_after(operation, VersionHook { versions: versions.clone() });
            }
        }

        let model = Arc::new(model);
        let reads = ReadPipeline {
            name: definition.name().to_string(),
            model: model.clone(),
            backend: backend.clone(),
        };

        registry
            .catalog()
            .add(definition.name(), definition.singular());
        registry
            .catalog()
            .attach_reader(definition.name(), Arc::new(reads.clone()));

        Ok(Self {
            definition: Arc::new(definition),
            model,
            backend,
            registry,
            versions,
            reads,
        })
    }

    pub fn name(&self) -> &str {
        self.definition.name()
    }

    pub fn model_name(&self) -> &str {
        self.definition.singular()
    }

    pub fn definition(&self) -> &CollectionDefinition {
        &self.definition
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn versions(&self) -> &VersionControl<B> {
        &self.versions
    }

    pub fn permissions(&self) -> &Permissions {
        self.definition.permissions()
    }

    pub fn can_user_read(&self, user: &str) -> bool {
        self.permissions().can_read(user)
    }

    pub fn can_user_write(&self, user: &str) -> bool {
        self.permissions().can_write(user)
    }

    pub fn attach_hook(&self, phase: HookPhase, operation: Operation, middleware: impl Middleware + 'static) {
        self.model.attach(phase, operation, Arc::new(middleware));
    }

    /// [`attach_hook`](Self::attach_hook) with the phase and operation given by name.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::InvalidHook`] for an unknown phase or operation.
    pub fn attach_named_hook(
        &self,
        phase: &str,
        operation: &str,
        middleware: impl Middleware + 'static,
    ) -> DocumentStoreResult<()> {
        self.attach_hook(phase.parse()?, operation.parse()?, middleware);
        Ok(())
    }

    pub fn use_before(&self, operation: Operation, middleware: impl Middleware + 'static) {
        self.model.use_before(operation, middleware);
    }

    pub fn use_after(&self, operation: Operation, middleware: impl Middleware + 'static) {
        self.model.use_after(operation, middleware);
    }

    /// Creates the store collection and registers the model's schema with the store.
    pub async fn register(&self) -> DocumentStoreResult<()> {
        self.backend.create_collection(self.name()).await?;
        self.backend
            .register_schema(self.name(), self.model.schema())
            .await
    }

    /// Inserts one document, assigning an `_id` when it has none.
    pub async fn create(&self, body: bson::Document) -> DocumentStoreResult<bson::Document> {
        self.insert_many(vec![body])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DocumentStoreError::Unknown(format!("insert into {} stored nothing", self.name())))
    }

    pub async fn insert_many(&self, bodies: Vec<bson::Document>) -> DocumentStoreResult<Vec<bson::Document>> {
        let records = bodies
            .into_iter()
            .map(|body| self.prepare(body))
            .collect();

        let context = self
            .model
            .run_before(Operation::Create, self.context(Operation::Create, records))
            .await?;

        self.raw().insert(pairs(&context.records)).await?;

        let context = self
            .model
            .run_after(Operation::Create, self.context(Operation::Create, context.records))
            .await?;

        Ok(self.present_all(context.records))
    }

    pub async fn read(&self, query: Query) -> DocumentStoreResult<Vec<bson::Document>> {
        self.reads.read(query).await
    }

    pub async fn read_one(&self, mut query: Query) -> DocumentStoreResult<Option<bson::Document>> {
        query.limit = Some(1);

        Ok(self.read(query).await?.into_iter().next())
    }

    pub async fn read_by_id(&self, id: Uuid) -> DocumentStoreResult<Option<bson::Document>> {
        self.read_one(Query::filtered(Filter::eq(ID_FIELD, id)))
            .await
    }

    /// Reads like [`read`](Self::read), replacing the ids held by linked fields with the
    /// linked documents. Linked documents are read through the linked collection's own
    /// read middleware.
    ///
    /// # Errors
    ///
    /// Fails with [`DocumentStoreError::UnknownModel`] when a linked field's target is
    /// not registered.
    pub async fn read_populated(&self, query: Query) -> DocumentStoreResult<Vec<bson::Document>> {
        let mut documents = self.read(query).await?;

        for name in self.definition.population_fields() {
            let Some(field) = self.definition.field(&name) else {
                continue;
            };
            let target = field.linked_collection(&self.registry).ok_or_else(|| {
                DocumentStoreError::UnknownModel(field.linked_model().unwrap_or_default().to_string())
            })?;

            let ids: Vec<Uuid> = documents
                .iter()
                .filter_map(|document| document.get(&name))
                .flat_map(linked_ids)
                .collect();

            if ids.is_empty() {
                continue;
            }

            let linked: HashMap<Uuid, Bson> = read_linked(
                &self.registry,
                &self.backend,
                &target.name,
                Query::filtered(Filter::any_of(ID_FIELD, ids)),
            )
            .await?
            .into_iter()
            .filter_map(|document| {
                let id = document
                    .as_document()?
                    .get(ID_FIELD)
                    .and_then(uuid_from_bson)?;
                Some((id, document))
            })
            .collect();

            for document in &mut documents {
                if let Some(value) = document.get_mut(&name) {
                    populate(value, &linked);
                }
            }
        }

        Ok(documents)
    }

    /// Replaces the whole collection with `bodies`.
    pub async fn update(&self, bodies: Vec<bson::Document>) -> DocumentStoreResult<Vec<bson::Document>> {
        let records = bodies
            .into_iter()
            .map(|body| self.prepare(body))
            .collect();

        let context = self
            .model
            .run_before(Operation::Update, self.context(Operation::Update, records))
            .await?;

        self.raw().clear().await?;
        self.raw().insert(pairs(&context.records)).await?;

        let context = self
            .model
            .run_after(Operation::Update, self.context(Operation::Update, context.records))
            .await?;

        Ok(self.present_all(context.records))
    }

    /// Sets the top-level keys of `changes` on the document `id`, keeping the others.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::DocumentNotFound`] if no document has that id.
    pub async fn update_by_id(&self, id: Uuid, mut changes: bson::Document) -> DocumentStoreResult<bson::Document> {
        let current = self
            .raw()
            .get(vec![id])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DocumentStoreError::DocumentNotFound(id.to_string(), self.name().to_string()))?;

        let mut body = Record::from_bson(current)?.into_body();

        self.model.virtuals().apply_setters(&mut changes);
        changes.remove(ID_FIELD);
        for (key, value) in changes {
            body.insert(key, value);
        }

        let record = self.replace(Record::with_id(id, body)).await?;

        Ok(self.present(record))
    }

    /// Deletes every document matching `query`, returning them.
    pub async fn del(&self, query: Query) -> DocumentStoreResult<Vec<bson::Document>> {
        let records = self
            .raw()
            .query(query)
            .await?
            .into_iter()
            .map(Record::from_bson)
            .collect::<DocumentStoreResult<Vec<_>>>()?;

        self.delete_records(records).await
    }

    /// Deletes the document `id`, returning it, or `None` if it does not exist.
    pub async fn del_by_id(&self, id: Uuid) -> DocumentStoreResult<Option<bson::Document>> {
        let records = self
            .raw()
            .get(vec![id])
            .await?
            .into_iter()
            .map(Record::from_bson)
            .collect::<DocumentStoreResult<Vec<_>>>()?;

        if records.is_empty() {
            return Ok(None);
        }

        Ok(self.delete_records(records).await?.into_iter().next())
    }

    pub async fn count(&self, query: Query) -> DocumentStoreResult<usize> {
        self.raw().count(query).await
    }

    /// Options of every linked field, see [`CollectionDefinition::linked_options`].
    pub async fn linked_options(&self) -> DocumentStoreResult<Vec<LinkedOptions>> {
        self.definition
            .linked_options(&self.registry, &self.backend)
            .await
    }

    /// Writes the state of `version_id` back to document `id` and records it as a new
    /// version.
    pub async fn restore_version(&self, id: Uuid, version_id: Uuid) -> DocumentStoreResult<Version> {
        self.versions
            .restore_version(id, version_id, self)
            .await
    }

    fn raw(&self) -> RawCollection<'_, B> {
        RawCollection::new(self.name(), &self.backend)
    }

    fn context(&self, operation: Operation, records: Vec<Record>) -> HookContext {
        HookContext::new(operation, self.name(), records)
    }

    /// Applies virtual setters and assigns the record identity.
    fn prepare(&self, mut body: bson::Document) -> Record {
        self.model.virtuals().apply_setters(&mut body);
        Record::new(body)
    }

    fn present(&self, record: Record) -> bson::Document {
        self.reads.present(record)
    }

    fn present_all(&self, records: Vec<Record>) -> Vec<bson::Document> {
        self.reads.present_all(records)
    }

    /// Replaces one stored document through the update middleware.
    async fn replace(&self, record: Record) -> DocumentStoreResult<Record> {
        let context = self
            .model
            .run_before(Operation::Update, self.context(Operation::Update, vec![record]))
            .await?;

        self.raw().update(pairs(&context.records)).await?;

        let context = self
            .model
            .run_after(Operation::Update, self.context(Operation::Update, context.records))
            .await?;

        context
            .records
            .into_iter()
            .next()
            .ok_or_else(|| DocumentStoreError::Unknown(format!("update of {} returned nothing", self.name())))
    }

    async fn delete_records(&self, records: Vec<Record>) -> DocumentStoreResult<Vec<bson::Document>> {
        let context = self
            .model
            .run_before(Operation::Delete, self.context(Operation::Delete, records))
            .await?;

        let ids: Vec<Uuid> = context.records.iter().map(|record| *record.id()).collect();
        if !ids.is_empty() {
            self.raw().delete(ids).await?;
        }

        let context = self
            .model
            .run_after(Operation::Delete, self.context(Operation::Delete, context.records))
            .await?;

        Ok(self.present_all(context.records))
    }
}

#[async_trait]
impl<B> DocumentHandle for Collection<B>
where
    B: StoreBackend + Clone + 'static,
{
    async fn restore_document(&self, id: Uuid, state: bson::Document) -> DocumentStoreResult<bson::Document> {
        Ok(self
            .replace(Record::with_id(id, state))
            .await?
            .into_body())
    }
}

/// The read path of one collection: before-read middleware, the store query,
/// after-read middleware, then virtual getters.
///
/// It is also the collection's [`CollectionReader`] in the catalog, which is why it
/// holds no registry.
#[derive(Debug, Clone)]
struct ReadPipeline<B: StoreBackend> {
    name: String,
    model: Arc<Model>,
    backend: B,
}

impl<B> ReadPipeline<B>
where
    B: StoreBackend + Clone + 'static,
{
    async fn read_records(&self, query: Query) -> DocumentStoreResult<Vec<Record>> {
        let context = self
            .model
            .run_before(
                Operation::Read,
                HookContext::new(Operation::Read, &self.name, Vec::new()).with_query(query),
            )
            .await?;

        let mut query = context.query.unwrap_or_default();
        if let Some(select) = query.select.as_mut() {
            if !select.iter().any(|field| field == ID_FIELD) {
                select.push(ID_FIELD.to_string());
            }
        }

        let records = RawCollection::new(self.name.as_str(), &self.backend)
            .query(query.clone())
            .await?
            .into_iter()
            .map(Record::from_bson)
            .collect::<DocumentStoreResult<Vec<_>>>()?;

        let context = self
            .model
            .run_after(
                Operation::Read,
                HookContext::new(Operation::Read, &self.name, records).with_query(query),
            )
            .await?;

        Ok(context.records)
    }

    /// Applies virtual getters to a record on its way out.
    fn present(&self, record: Record) -> bson::Document {
        let mut body = record.into_body();
        self.model.virtuals().apply_getters(&mut body);
        body
    }

    fn present_all(&self, records: Vec<Record>) -> Vec<bson::Document> {
        records
            .into_iter()
            .map(|record| self.present(record))
            .collect()
    }
}

#[async_trait]
impl<B> CollectionReader for ReadPipeline<B>
where
    B: StoreBackend + Clone + 'static,
{
    async fn read(&self, query: Query) -> DocumentStoreResult<Vec<bson::Document>> {
        Ok(self.present_all(self.read_records(query).await?))
    }
}

/// Appends the stored state of each record to the version log.
struct VersionHook<B: StoreBackend> {
    versions: VersionControl<B>,
}

#[async_trait]
impl<B> Middleware for VersionHook<B>
where
    B: StoreBackend + Clone + 'static,
{
    async fn handle(&self, context: HookContext) -> DocumentStoreResult<HookContext> {
        for record in &context.records {
            self.versions
                .save_version(*record.id(), record.body())
                .await?;
        }

        Ok(context)
    }
}

fn pairs(records: &[Record]) -> Vec<(Uuid, Bson)> {
    records
        .iter()
        .map(|record| (*record.id(), record.to_bson()))
        .collect()
}

fn linked_ids(value: &Bson) -> Vec<Uuid> {
    match value {
        Bson::Array(items) => items.iter().filter_map(uuid_from_bson).collect(),
        other => uuid_from_bson(other).into_iter().collect(),
    }
}

fn populate(value: &mut Bson, linked: &HashMap<Uuid, Bson>) {
    match value {
        Bson::Array(items) => {
            for item in items {
                populate(item, linked);
            }
        }
        other => {
            if let Some(document) = uuid_from_bson(other).and_then(|id| linked.get(&id)) {
                *other = document.clone();
            }
        }
    }
}
