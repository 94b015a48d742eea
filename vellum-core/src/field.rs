//! Field definitions.
//!
//! A [`FieldDefinition`] is one named field of a collection. Its [`FieldType`] is exactly
//! one of:
//!
//! - a primitive storage type ([`TypeSpec`]),
//! - a link to another collection's model,
//! - a nested group of child fields.
//!
//! Any of the three may be multi-value (the field holds a sequence of that type).
//!
//! Nested groups flatten to dot paths. A group `person` holding a group `name` with a
//! leaf `first` flattens to `person.name.first`. Flattening stops at primitive, linked
//! and multi-value fields; a multi-value group is always a leaf.
//!
//! ```ignore
//! let registry = Registry::new();
//! let name = FieldDefinition::new("name", None, Some(FieldSpec::group(vec![
//!     FieldDefinition::new("first", None, None, registry.links())?,
//!     FieldDefinition::new("last", None, None, registry.links())?,
//! ])), registry.links())?;
//!
//! assert_eq!(name.flat_fields().keys().collect::<Vec<_>>(), ["name.first", "name.last"]);
//! ```

use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicU64, Ordering},
};

use serde_json::{Map, Value};

use crate::{
    error::{DocumentStoreError, DocumentStoreResult},
    registry::{CatalogEntry, LinkRegistry, Registry},
    types::{Primitive, TypeSpec},
};

static NEXT_FIELD_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a constructed field, used as the link registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId(u64);

impl FieldId {
    pub fn next() -> Self {
        FieldId(NEXT_FIELD_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Target of a linked field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// A model referenced by name.
    Model(String),
    /// A collection handle; links resolve through its model name.
    Collection { name: String, model: String },
}

impl Reference {
    pub fn model_name(&self) -> &str {
        match self {
            Reference::Model(model) => model,
            Reference::Collection { model, .. } => model,
        }
    }
}

/// Shape of a field, decided once at construction.
#[derive(Debug, Clone)]
pub enum FieldType {
    Primitive(TypeSpec),
    Linked {
        spec: TypeSpec,
        reference: Reference,
        display: Option<String>,
    },
    Group {
        fields: BTreeMap<String, FieldDefinition>,
        modifiers: Map<String, Value>,
    },
}

/// Construction input for a [`FieldDefinition`].
#[derive(Debug, Clone)]
pub enum FieldSpec {
    Scalar(TypeSpec),
    Linked {
        spec: TypeSpec,
        reference: Reference,
        display: Option<String>,
    },
    Group(Vec<FieldDefinition>),
    /// A one-element sequence: the field holds many values of the inner spec.
    Many(Box<FieldSpec>),
}

impl FieldSpec {
    /// Link to `model`, stored as a UUID.
    pub fn linked(model: impl Into<String>) -> Self {
        FieldSpec::Linked {
            spec: TypeSpec::new(Primitive::Uuid),
            reference: Reference::Model(model.into()),
            display: None,
        }
    }

    pub fn group(fields: Vec<FieldDefinition>) -> Self {
        FieldSpec::Group(fields)
    }

    pub fn many(self) -> Self {
        FieldSpec::Many(Box::new(self))
    }

    /// Sets the display field of a link. No effect on other specs.
    pub fn display(mut self, field: impl Into<String>) -> Self {
        if let FieldSpec::Linked { display, .. } = &mut self {
            *display = Some(field.into());
        }

        self
    }
}

impl From<Primitive> for FieldSpec {
    fn from(primitive: Primitive) -> Self {
        FieldSpec::Scalar(TypeSpec::new(primitive))
    }
}

impl From<TypeSpec> for FieldSpec {
    fn from(spec: TypeSpec) -> Self {
        FieldSpec::Scalar(spec)
    }
}

/// Link target as it appears in a derived schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaLink {
    pub model: String,
    pub display: Option<String>,
}

/// Storage shape derived from a field, consumed by schema registration.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaType {
    /// A primitive with no modifiers.
    Bare(Primitive),
    /// A primitive with a name, modifiers or a link.
    Typed {
        spec: TypeSpec,
        link: Option<SchemaLink>,
    },
    /// A sequence of the inner shape.
    List(Box<SchemaType>),
    /// Child shapes of a nested group.
    Nested(BTreeMap<String, SchemaType>),
}

impl SchemaType {
    /// Storage primitive of a scalar or list shape.
    pub fn primitive(&self) -> Option<Primitive> {
        match self {
            SchemaType::Bare(primitive) => Some(*primitive),
            SchemaType::Typed { spec, .. } => Some(spec.primitive()),
            SchemaType::List(inner) => inner.primitive(),
            SchemaType::Nested(_) => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            SchemaType::Bare(primitive) => Value::String(primitive.name().to_string()),
            SchemaType::Typed { spec, link: None } => spec.to_json(),
            SchemaType::Typed { spec, link: Some(link) } => {
                let mut object = spec_object(spec);
                object.insert("ref".into(), Value::String(link.model.clone()));

                if let Some(display) = &link.display {
                    object.insert("display".into(), Value::String(display.clone()));
                }

                Value::Object(object)
            }
            SchemaType::List(inner) => Value::Array(vec![inner.to_json()]),
            SchemaType::Nested(children) => Value::Object(
                children
                    .iter()
                    .map(|(key, child)| (key.clone(), child.to_json()))
                    .collect(),
            ),
        }
    }
}

/// One named field of a collection.
#[derive(Debug, Clone)]
pub struct FieldDefinition {
    id: FieldId,
    name: String,
    label: String,
    field_type: FieldType,
    multi_value: bool,
}

impl FieldDefinition {
    /// Builds a field.
    ///
    /// The label defaults to the capitalized name and the spec to a bare `String`. A
    /// [`FieldSpec::Many`] is unwrapped and marks the field multi-value. Linked specs are
    /// recorded in `links` under the new field's identity.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::InvalidField`] if the name is empty, a multi-value
    /// spec is nested in another, or a group declares the same child twice.
    pub fn new(
        name: impl Into<String>,
        label: Option<&str>,
        spec: Option<FieldSpec>,
        links: &LinkRegistry,
    ) -> DocumentStoreResult<Self> {
        let name = name.into();

        if name.is_empty() {
            return Err(DocumentStoreError::InvalidField(
                "Cannot create a field without a name".to_string(),
            ));
        }

        let (spec, multi_value) = match spec.unwrap_or_else(|| Primitive::String.into()) {
            FieldSpec::Many(inner) => (*inner, true),
            spec => (spec, false),
        };

        let field_type = match spec {
            FieldSpec::Scalar(spec) => FieldType::Primitive(spec),
            FieldSpec::Linked { spec, reference, display } => FieldType::Linked { spec, reference, display },
            FieldSpec::Group(children) => {
                let mut fields = BTreeMap::new();

                for child in children {
                    if fields.contains_key(child.name()) {
                        return Err(DocumentStoreError::InvalidField(format!(
                            "`{name}` field declares `{}` more than once",
                            child.name()
                        )));
                    }

                    fields.insert(child.name().to_string(), child);
                }

                FieldType::Group { fields, modifiers: Map::new() }
            }
            FieldSpec::Many(_) => {
                return Err(DocumentStoreError::InvalidField(format!(
                    "`{name}` field cannot nest multi-value types"
                )));
            }
        };

        let field = Self {
            id: FieldId::next(),
            label: label
                .map(str::to_string)
                .unwrap_or_else(|| capitalize(&name)),
            name,
            field_type,
            multi_value,
        };

        if let Some(model) = field.linked_model() {
            links.link(field.id, model);
        }

        Ok(field)
    }

    pub fn id(&self) -> FieldId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn field_type(&self) -> &FieldType {
        &self.field_type
    }

    pub fn is_multi_value(&self) -> bool {
        self.multi_value
    }

    pub fn is_linked(&self) -> bool {
        matches!(self.field_type, FieldType::Linked { .. })
    }

    pub fn is_group(&self) -> bool {
        matches!(self.field_type, FieldType::Group { .. })
    }

    /// Direct children of a group field.
    pub fn children(&self) -> Option<&BTreeMap<String, FieldDefinition>> {
        match &self.field_type {
            FieldType::Group { fields, .. } => Some(fields),
            _ => None,
        }
    }

    /// Model name this field links to.
    pub fn linked_model(&self) -> Option<&str> {
        match &self.field_type {
            FieldType::Linked { reference, .. } => Some(reference.model_name()),
            _ => None,
        }
    }

    /// Collection this field links to, resolved through the registry.
    ///
    /// `None` when the field is not linked or its target is not registered yet.
    pub fn linked_collection(&self, registry: &Registry) -> Option<CatalogEntry> {
        if !self.is_linked() {
            return None;
        }

        registry.resolve_link(self.id)
    }

    /// Field of the linked collection used to label options.
    pub fn linked_display(&self) -> Option<&str> {
        match &self.field_type {
            FieldType::Linked { display, .. } => display.as_deref(),
            _ => None,
        }
    }

    /// `[name, custom type name?, primitive name]` for scalar and linked fields,
    /// `[name, "COMPLEX"]` for groups.
    pub fn type_names(&self) -> Vec<String> {
        let mut names = vec![self.name.clone()];

        match &self.field_type {
            FieldType::Primitive(spec) | FieldType::Linked { spec, .. } => {
                if let Some(name) = spec.name() {
                    names.push(name.to_string());
                }

                names.push(spec.primitive().name().to_string());
            }
            FieldType::Group { .. } => names.push("COMPLEX".to_string()),
        }

        names
    }

    /// Leaf fields keyed by dot path.
    ///
    /// Single-valued, non-empty groups are descended; everything else is a leaf keyed by
    /// its own name.
    pub fn flat_fields(&self) -> BTreeMap<String, &FieldDefinition> {
        let mut flat = BTreeMap::new();

        match self.flattenable_children() {
            Some(children) => flatten_into(&self.name, children, &mut flat),
            None => {
                flat.insert(self.name.clone(), self);
            }
        }

        flat
    }

    /// Attaches a modifier to the field's type.
    ///
    /// A bare primitive becomes `{type, prop: value}`; structured types get the property
    /// set directly.
    pub fn extend_type(&mut self, prop: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        let (prop, value) = (prop.into(), value.into());

        match &mut self.field_type {
            FieldType::Primitive(spec) | FieldType::Linked { spec, .. } => spec.set_modifier(prop, value),
            FieldType::Group { modifiers, .. } => {
                modifiers.insert(prop, value);
            }
        }

        self
    }

    /// Modifiers attached to the field's type.
    pub fn modifiers(&self) -> &Map<String, Value> {
        match &self.field_type {
            FieldType::Primitive(spec) | FieldType::Linked { spec, .. } => spec.modifiers(),
            FieldType::Group { modifiers, .. } => modifiers,
        }
    }

    /// Storage shape of this field.
    pub fn schema_type(&self) -> SchemaType {
        let shape = match &self.field_type {
            FieldType::Primitive(spec) if spec.is_bare() => SchemaType::Bare(spec.primitive()),
            FieldType::Primitive(spec) => SchemaType::Typed {
                spec: spec.clone(),
                link: None,
            },
            FieldType::Linked { spec, reference, display } => SchemaType::Typed {
                spec: spec.clone(),
                link: Some(SchemaLink {
                    model: reference.model_name().to_string(),
                    display: display.clone(),
                }),
            },
            FieldType::Group { fields, .. } => SchemaType::Nested(
                fields
                    .iter()
                    .map(|(key, child)| (key.clone(), child.schema_type()))
                    .collect(),
            ),
        };

        if self.multi_value {
            SchemaType::List(Box::new(shape))
        } else {
            shape
        }
    }

    /// Storage shapes keyed by dot path, following the same rules as [`flat_fields`](Self::flat_fields).
    pub fn flat_schema_types(&self) -> BTreeMap<String, SchemaType> {
        self.flat_fields()
            .into_iter()
            .map(|(path, field)| (path, field.schema_type()))
            .collect()
    }

    /// Plain-data snapshot `{name, label, schemaType}`, recursing into groups.
    ///
    /// The `schemaType` uses the declaration format, so the snapshot of a field can be
    /// parsed back into an equivalent field.
    pub fn to_object(&self) -> Value {
        let schema_type = match &self.field_type {
            FieldType::Primitive(spec) => Value::Object(spec_object(spec)),
            FieldType::Linked { spec, reference, display } => {
                let mut object = spec_object(spec);
                object.insert("ref".into(), Value::String(reference.model_name().to_string()));

                if let Some(display) = display {
                    object.insert("display".into(), Value::String(display.clone()));
                }

                Value::Object(object)
            }
            FieldType::Group { fields, .. } => Value::Object(
                fields
                    .iter()
                    .map(|(key, child)| (key.clone(), child.to_object()))
                    .collect(),
            ),
        };

        let mut object = Map::new();
        object.insert("name".into(), Value::String(self.name.clone()));
        object.insert("label".into(), Value::String(self.label.clone()));
        object.insert(
            "schemaType".into(),
            if self.multi_value { Value::Array(vec![schema_type]) } else { schema_type },
        );

        Value::Object(object)
    }

    fn flattenable_children(&self) -> Option<&BTreeMap<String, FieldDefinition>> {
        match &self.field_type {
            FieldType::Group { fields, .. } if !self.multi_value && !fields.is_empty() => Some(fields),
            _ => None,
        }
    }
}

fn flatten_into<'a>(
    prefix: &str,
    children: &'a BTreeMap<String, FieldDefinition>,
    flat: &mut BTreeMap<String, &'a FieldDefinition>,
) {
    for (key, child) in children {
        let path = format!("{prefix}.{key}");

        match child.flattenable_children() {
            Some(grandchildren) => flatten_into(&path, grandchildren, flat),
            None => {
                flat.insert(path, child);
            }
        }
    }
}

fn spec_object(spec: &TypeSpec) -> Map<String, Value> {
    match spec.to_json() {
        Value::Object(object) => object,
        other => {
            let mut object = Map::new();
            object.insert("type".into(), other);
            object
        }
    }
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();

    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
