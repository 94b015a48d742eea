//! Collection definitions.
//!
//! A [`CollectionDefinition`] owns the fields of one entity type and mediates every
//! structural change to them. It starts unlocked; [`CollectionDefinition::build_model`]
//! materializes the [`Model`] and locks it for good. After that, adding or removing
//! fields or virtuals fails with [`DocumentStoreError::Locked`].

use std::{collections::BTreeMap, fmt, sync::Arc};

use bson::Bson;
use futures::future::try_join_all;
use serde_json::{Map, Value};

use crate::{
    backend::StoreBackend,
    document::ID_FIELD,
    error::{DocumentStoreError, DocumentStoreResult},
    field::{FieldDefinition, SchemaType},
    model::{HookPhase, Middleware, MiddlewareRef, Model, Operation, Schema, VirtualGetter, VirtualKind, VirtualSetter, Virtuals},
    permission::Permissions,
    query::Query,
    registry::Registry,
    store::RawCollection,
};

/// A getter or setter for a virtual path.
#[derive(Clone)]
pub enum VirtualAccessor {
    Get(VirtualGetter),
    Set(VirtualSetter),
}

impl VirtualAccessor {
    pub fn kind(&self) -> VirtualKind {
        match self {
            VirtualAccessor::Get(_) => VirtualKind::Get,
            VirtualAccessor::Set(_) => VirtualKind::Set,
        }
    }
}

impl fmt::Debug for VirtualAccessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("VirtualAccessor").field(&self.kind()).finish()
    }
}

/// Documents of a linked collection, reduced to id and display field.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkedOptions {
    /// Name of the linked field.
    pub field: String,
    pub options: Vec<Bson>,
}

/// Reads `collection` through its attached reader, or straight from `backend` when it
/// has none.
pub(crate) async fn read_linked<B: StoreBackend>(
    registry: &Registry,
    backend: &B,
    collection: &str,
    query: Query,
) -> DocumentStoreResult<Vec<Bson>> {
    match registry.catalog().reader(collection) {
        Some(reader) => Ok(reader
            .read(query)
            .await?
            .into_iter()
            .map(Bson::Document)
            .collect()),
        None => RawCollection::new(collection, backend).query(query).await,
    }
}

/// The fields, metadata and behaviors of one entity type.
pub struct CollectionDefinition {
    name: String,
    singular: String,
    fields: BTreeMap<String, FieldDefinition>,
    meta: Map<String, Value>,
    default_field: String,
    versioned: bool,
    permissions: Permissions,
    virtuals: Virtuals,
    hooks: Vec<(HookPhase, Operation, MiddlewareRef)>,
    locked: bool,
}

impl CollectionDefinition {
    /// An empty, unlocked, versioned definition.
    pub fn new(name: impl Into<String>, singular: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            singular: singular.into(),
            fields: BTreeMap::new(),
            meta: Map::new(),
            default_field: ID_FIELD.to_string(),
            versioned: true,
            permissions: Permissions::default(),
            virtuals: Virtuals::default(),
            hooks: Vec::new(),
            locked: false,
        }
    }

    /// The collection (registry) name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The entity type name, used as the model name.
    pub fn singular(&self) -> &str {
        &self.singular
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn is_versioned(&self) -> bool {
        self.versioned
    }

    pub fn set_versioned(&mut self, versioned: bool) -> &mut Self {
        self.versioned = versioned;
        self
    }

    pub fn default_field(&self) -> &str {
        &self.default_field
    }

    pub fn set_default_field(&mut self, field: impl Into<String>) -> &mut Self {
        self.default_field = field.into();
        self
    }

    pub fn permissions(&self) -> &Permissions {
        &self.permissions
    }

    pub fn set_permissions(&mut self, permissions: Permissions) -> &mut Self {
        self.permissions = permissions;
        self
    }

    pub fn meta(&self) -> &Map<String, Value> {
        &self.meta
    }

    pub fn meta_value(&self, prop: &str) -> Option<&Value> {
        self.meta.get(prop)
    }

    pub fn set_meta(&mut self, prop: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.meta.insert(prop.into(), value.into());
        self
    }

    /// Adds `field` under its name, replacing any field of the same name.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Locked`] once the model has been built.
    pub fn add_field(&mut self, field: FieldDefinition) -> DocumentStoreResult<&mut Self> {
        if self.locked {
            return Err(DocumentStoreError::Locked(
                "Attempting to add a new field to a locked collection".to_string(),
            ));
        }

        self.fields.insert(field.name().to_string(), field);

        Ok(self)
    }

    /// Removes the field called `name`. Removing an unknown field is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Locked`] once the model has been built.
    pub fn remove_field(&mut self, name: &str) -> DocumentStoreResult<&mut Self> {
        if self.locked {
            return Err(DocumentStoreError::Locked(
                "Attempting to remove a field from a locked collection".to_string(),
            ));
        }

        self.fields.remove(name);

        Ok(self)
    }

    /// Top-level fields by name.
    pub fn fields(&self) -> &BTreeMap<String, FieldDefinition> {
        &self.fields
    }

    /// Every leaf field keyed by dot path, across all top-level fields.
    pub fn flat_fields(&self) -> BTreeMap<String, &FieldDefinition> {
        self.fields
            .values()
            .flat_map(FieldDefinition::flat_fields)
            .collect()
    }

    /// Looks up a top-level field, or a flattened leaf when `name` is a dot path.
    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        if name.contains('.') {
            self.flat_fields().get(name).copied()
        } else {
            self.fields.get(name)
        }
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }

    /// [`FieldDefinition::type_names`] of a top-level or flattened field.
    pub fn field_types(&self, name: &str) -> Option<Vec<String>> {
        self.field(name).map(FieldDefinition::type_names)
    }

    /// Top-level fields whose flattened paths intersect `keys`.
    ///
    /// Each key is grouped back up to its root segment, so `person.name.first` and
    /// `person.age` both yield `person`. Keys whose root is not a field are skipped.
    pub fn inflate_fields<I, S>(&self, keys: I) -> BTreeMap<String, &FieldDefinition>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        keys.into_iter()
            .filter_map(|key| {
                let root = key.as_ref().split('.').next()?;
                self.fields
                    .get_key_value(root)
                    .map(|(name, field)| (name.clone(), field))
            })
            .collect()
    }

    /// Storage shapes keyed by top-level name, or by dot path when `flatten` is set.
    pub fn schema_types(&self, flatten: bool) -> BTreeMap<String, SchemaType> {
        if flatten {
            self.fields
                .values()
                .flat_map(FieldDefinition::flat_schema_types)
                .collect()
        } else {
            self.fields
                .iter()
                .map(|(name, field)| (name.clone(), field.schema_type()))
                .collect()
        }
    }

    /// Names of linked top-level fields, the candidates for population on read.
    pub fn population_fields(&self) -> Vec<String> {
        self.fields
            .values()
            .filter(|field| field.is_linked())
            .map(|field| field.name().to_string())
            .collect()
    }

    /// Reads the options of every linked field concurrently.
    ///
    /// Options are the linked collection's documents reduced to `_id` and the field's
    /// display property, read through the linked collection's own read middleware when
    /// it was bound through a façade. Results follow field name order.
    ///
    /// # Errors
    ///
    /// Fails with [`DocumentStoreError::UnknownModel`] if a link target is not
    /// registered, or with the first failing read.
    pub async fn linked_options<B: StoreBackend>(
        &self,
        registry: &Registry,
        backend: &B,
    ) -> DocumentStoreResult<Vec<LinkedOptions>> {
        let reads = self
            .fields
            .values()
            .filter(|field| field.is_linked())
            .map(|field| async move {
                let target = field.linked_collection(registry).ok_or_else(|| {
                    DocumentStoreError::UnknownModel(field.linked_model().unwrap_or_default().to_string())
                })?;

                let mut select = vec![ID_FIELD.to_string()];
                if let Some(display) = field.linked_display() {
                    select.push(display.to_string());
                }

                let options = read_linked(
                    registry,
                    backend,
                    &target.name,
                    Query::builder().select(select).build(),
                )
                .await?;

                Ok::<_, DocumentStoreError>(LinkedOptions {
                    field: field.name().to_string(),
                    options,
                })
            });

        try_join_all(reads).await
    }

    pub fn virtuals(&self) -> &Virtuals {
        &self.virtuals
    }

    /// Registers a computed property accessor on the eventual model.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Locked`] once the model has been built.
    pub fn add_virtual(&mut self, path: impl Into<String>, accessor: VirtualAccessor) -> DocumentStoreResult<&mut Self> {
        if self.locked {
            return Err(DocumentStoreError::Locked(
                "Attempting to add a virtual to a locked collection".to_string(),
            ));
        }

        match accessor {
            VirtualAccessor::Get(getter) => self.virtuals.add_getter(path, getter),
            VirtualAccessor::Set(setter) => self.virtuals.add_setter(path, setter),
        }

        Ok(self)
    }

    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Locked`] once the model has been built.
    pub fn remove_virtual(&mut self, path: &str, kind: VirtualKind) -> DocumentStoreResult<&mut Self> {
        if self.locked {
            return Err(DocumentStoreError::Locked(
                "Attempting to remove a virtual from a locked collection".to_string(),
            ));
        }

        self.virtuals.remove(path, kind);

        Ok(self)
    }

    /// Queues a middleware for the model built from this definition.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Locked`] once the model has been built; attach to
    /// the [`Model`] instead.
    pub fn attach_hook(
        &mut self,
        phase: HookPhase,
        operation: Operation,
        middleware: impl Middleware + 'static,
    ) -> DocumentStoreResult<&mut Self> {
        if self.locked {
            return Err(DocumentStoreError::Locked(
                "Attempting to attach a hook to a locked collection".to_string(),
            ));
        }

        self.hooks.push((phase, operation, Arc::new(middleware)));

        Ok(self)
    }

    /// [`attach_hook`](Self::attach_hook) with the phase and operation given by name,
    /// as in `("pre", "save")`.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::InvalidHook`] for an unknown phase or operation.
    pub fn attach_named_hook(
        &mut self,
        phase: &str,
        operation: &str,
        middleware: impl Middleware + 'static,
    ) -> DocumentStoreResult<&mut Self> {
        let phase = phase.parse()?;
        let operation = operation.parse()?;

        self.attach_hook(phase, operation, middleware)
    }

    /// The field shapes handed to the store.
    pub fn schema(&self) -> Schema {
        Schema {
            model: self.singular.clone(),
            paths: self.schema_types(false),
            virtuals: self.virtuals.paths(),
        }
    }

    /// Locks the definition and materializes its model.
    ///
    /// Queued hooks are attached to the model's pipeline in the order they were added.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Locked`] if the model was already built.
    pub fn build_model(&mut self) -> DocumentStoreResult<Model> {
        if self.locked {
            return Err(DocumentStoreError::Locked(
                "Attempting to build a model for a locked collection".to_string(),
            ));
        }

        self.locked = true;

        let model = Model::new(
            self.singular.clone(),
            self.name.clone(),
            self.schema(),
            self.virtuals.clone(),
        );

        for (phase, operation, middleware) in self.hooks.drain(..) {
            model.attach(phase, operation, middleware);
        }

        tracing::debug!(
            collection = %self.name,
            model = %self.singular,
            fields = self.fields.len(),
            virtuals = model.virtuals().paths().len(),
            "built model"
        );

        Ok(model)
    }
}

impl fmt::Debug for CollectionDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionDefinition")
            .field("name", &self.name)
            .field("singular", &self.singular)
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .field("default_field", &self.default_field)
            .field("versioned", &self.versioned)
            .field("virtuals", &self.virtuals)
            .field("hooks", &self.hooks.len())
            .field("locked", &self.locked)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{field::FieldSpec, model::HookContext, registry::LinkRegistry};
    use pretty_assertions::assert_eq;

    fn leaf(name: &str, links: &LinkRegistry) -> FieldDefinition {
        FieldDefinition::new(name, None, None, links).unwrap()
    }

    fn group(name: &str, children: Vec<FieldDefinition>, links: &LinkRegistry) -> FieldDefinition {
        FieldDefinition::new(name, None, Some(FieldSpec::group(children)), links).unwrap()
    }

    fn people(links: &LinkRegistry) -> CollectionDefinition {
        let mut definition = CollectionDefinition::new("people", "Person");
        let name = group("name", vec![leaf("first", links), leaf("last", links)], links);
        let person = group("person", vec![name, leaf("nickname", links)], links);

        definition
            .add_field(leaf("title", links))
            .unwrap()
            .add_field(person)
            .unwrap()
            .add_field(FieldDefinition::new("author", None, Some(FieldSpec::linked("User")), links).unwrap())
            .unwrap();

        definition
    }

    #[test]
    fn defaults() {
        let definition = CollectionDefinition::new("posts", "Post");

        assert_eq!(definition.default_field(), "_id");
        assert!(definition.is_versioned());
        assert!(!definition.is_locked());
        assert!(definition.fields().is_empty());
    }

    #[test]
    fn flattened_view_spans_every_top_level_field() {
        let links = LinkRegistry::default();
        let definition = people(&links);

        assert_eq!(
            definition.flat_fields().keys().cloned().collect::<Vec<_>>(),
            vec!["author", "person.name.first", "person.name.last", "person.nickname", "title"]
        );
        assert_eq!(definition.field("person.name.last").map(FieldDefinition::name), Some("last"));
        assert_eq!(definition.field("person").map(FieldDefinition::is_group), Some(true));
        assert!(definition.field("person.missing").is_none());
        assert_eq!(
            definition.field_types("person.nickname"),
            Some(vec!["nickname".to_string(), "String".to_string()])
        );
    }

    #[test]
    fn inflating_flattened_keys_restores_top_level_fields() {
        let links = LinkRegistry::default();
        let definition = people(&links);
        let flat = definition.flat_fields();

        let inflated = definition.inflate_fields(flat.keys());

        assert_eq!(inflated.keys().cloned().collect::<Vec<_>>(), definition.field_names());

        let partial = definition.inflate_fields(["person.name.first", "unknown.key"]);
        assert_eq!(partial.keys().cloned().collect::<Vec<_>>(), vec!["person"]);
    }

    #[test]
    fn population_fields_are_the_linked_ones() {
        let links = LinkRegistry::default();
        let definition = people(&links);

        assert_eq!(definition.population_fields(), vec!["author"]);
    }

    #[test]
    fn remove_field_is_idempotent() {
        let links = LinkRegistry::default();
        let mut definition = people(&links);

        definition.remove_field("title").unwrap();
        definition.remove_field("title").unwrap();

        assert_eq!(definition.field_names(), vec!["author", "person"]);
    }

    #[test]
    fn building_the_model_locks_the_definition() {
        let links = LinkRegistry::default();
        let mut definition = people(&links);

        let model = definition.build_model().unwrap();
        assert_eq!(model.name(), "Person");
        assert_eq!(model.collection(), "people");
        assert!(definition.is_locked());

        let cases = [
            definition.add_field(leaf("extra", &links)).map(|_| ()).unwrap_err(),
            definition.remove_field("title").map(|_| ()).unwrap_err(),
            definition
                .add_virtual("x", VirtualAccessor::Get(Arc::new(|_: &bson::Document| Bson::Null)))
                .map(|_| ())
                .unwrap_err(),
            definition.remove_virtual("x", VirtualKind::Get).map(|_| ()).unwrap_err(),
            definition.build_model().map(|_| ()).unwrap_err(),
        ];

        let messages: Vec<String> = cases.iter().map(ToString::to_string).collect();
        assert_eq!(
            messages,
            vec![
                "Attempting to add a new field to a locked collection",
                "Attempting to remove a field from a locked collection",
                "Attempting to add a virtual to a locked collection",
                "Attempting to remove a virtual from a locked collection",
                "Attempting to build a model for a locked collection",
            ]
        );
        assert!(definition.field("extra").is_none());
    }

    #[test]
    fn schema_carries_model_name_shapes_and_virtuals() {
        let links = LinkRegistry::default();
        let mut definition = people(&links);
        definition
            .add_virtual("display", VirtualAccessor::Get(Arc::new(|_: &bson::Document| Bson::Null)))
            .unwrap();

        let schema = definition.schema();

        assert_eq!(schema.model, "Person");
        assert_eq!(schema.virtuals, vec!["display"]);
        assert_eq!(
            schema.to_json(),
            serde_json::json!({
                "author": { "type": "Uuid", "ref": "User" },
                "person": {
                    "name": { "first": "String", "last": "String" },
                    "nickname": "String"
                },
                "title": "String"
            })
        );
        assert_eq!(
            definition.schema_types(true).keys().cloned().collect::<Vec<_>>(),
            vec!["author", "person.name.first", "person.name.last", "person.nickname", "title"]
        );
    }

    #[test]
    fn queued_hooks_move_to_the_model() {
        let mut definition = CollectionDefinition::new("posts", "Post");
        definition
            .attach_named_hook("pre", "save", |ctx: HookContext| async move { Ok::<_, DocumentStoreError>(ctx) })
            .unwrap();

        let err = definition
            .attach_named_hook("around", "save", |ctx: HookContext| async move { Ok::<_, DocumentStoreError>(ctx) })
            .map(|_| ())
            .unwrap_err();
        assert_eq!(err.to_string(), r#"Must include "pre" or "post" when attaching a hook"#);

        let model = definition.build_model().unwrap();

        assert_eq!(model.pipeline().len(HookPhase::Before, Operation::Create), 1);
        assert!(
            definition
                .attach_hook(HookPhase::After, Operation::Read, |ctx: HookContext| async move {
                    Ok::<_, DocumentStoreError>(ctx)
                })
                .is_err()
        );
    }

    #[test]
    fn meta_values() {
        let mut definition = CollectionDefinition::new("posts", "Post");
        definition.set_meta("icon", "post").set_meta("order", 3);

        assert_eq!(definition.meta_value("icon"), Some(&Value::from("post")));
        assert_eq!(definition.meta_value("order"), Some(&Value::from(3)));
        assert_eq!(definition.meta_value("missing"), None);
        assert_eq!(definition.field_types("missing"), None);
    }
}
