//! Storage types for field declarations.
//!
//! A declared field type resolves to a [`TypeSpec`]: one [`Primitive`] storage type, an
//! optional custom type name, and free-form modifiers (`required`, `default`, `select`,
//! ...) that are passed through to the store's schema untouched.
//!
//! Custom types live in a [`TypeLibrary`]. Registering `Email` as
//! `{ "type": "String", "match": "^.+@.+$" }` lets declarations write
//! `{ "type": "Email", "required": true }`.

use std::{collections::BTreeMap, fmt, str::FromStr};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{DocumentStoreError, DocumentStoreResult};

/// Storage types understood by every backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Primitive {
    String,
    Number,
    Boolean,
    Date,
    Buffer,
    ObjectId,
    Uuid,
    Decimal,
    Mixed,
}

impl Primitive {
    /// Canonical type name, as reported by [`crate::field::FieldDefinition::type_names`].
    pub fn name(&self) -> &'static str {
        match self {
            Primitive::String => "String",
            Primitive::Number => "Number",
            Primitive::Boolean => "Boolean",
            Primitive::Date => "Date",
            Primitive::Buffer => "Buffer",
            Primitive::ObjectId => "ObjectId",
            Primitive::Uuid => "Uuid",
            Primitive::Decimal => "Decimal",
            Primitive::Mixed => "Mixed",
        }
    }

    /// Parses a declared type name, ignoring case and `Schema`/`Types.` decorations.
    ///
    /// `"String"`, `"string"`, `"SchemaString"` and `"Schema.Types.String"` all resolve
    /// to [`Primitive::String`].
    pub fn normalize(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        let trimmed = trimmed
            .strip_prefix("Schema.Types.")
            .or_else(|| trimmed.strip_prefix("Types."))
            .unwrap_or(trimmed);
        let trimmed = trimmed
            .strip_prefix("Schema")
            .or_else(|| trimmed.strip_suffix("Schema"))
            .unwrap_or(trimmed);

        Some(match trimmed.to_ascii_lowercase().as_str() {
            "string" | "str" | "text" => Primitive::String,
            "number" | "int" | "integer" | "float" | "double" => Primitive::Number,
            "boolean" | "bool" => Primitive::Boolean,
            "date" | "datetime" => Primitive::Date,
            "buffer" | "binary" => Primitive::Buffer,
            "objectid" | "oid" => Primitive::ObjectId,
            "uuid" => Primitive::Uuid,
            "decimal" | "decimal128" => Primitive::Decimal,
            "mixed" | "any" => Primitive::Mixed,
            _ => return None,
        })
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Primitive {
    type Err = DocumentStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Primitive::normalize(s)
            .ok_or_else(|| DocumentStoreError::InvalidField(format!("unknown type `{s}`")))
    }
}

/// A resolved storage type with its modifiers.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeSpec {
    primitive: Primitive,
    name: Option<String>,
    modifiers: Map<String, Value>,
}

impl TypeSpec {
    pub fn new(primitive: Primitive) -> Self {
        Self {
            primitive,
            name: None,
            modifiers: Map::new(),
        }
    }

    /// Tags the spec with a custom type name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Adds a modifier, replacing any previous value.
    pub fn with(mut self, prop: impl Into<String>, value: impl Into<Value>) -> Self {
        self.modifiers.insert(prop.into(), value.into());
        self
    }

    pub fn primitive(&self) -> Primitive {
        self.primitive
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn modifiers(&self) -> &Map<String, Value> {
        &self.modifiers
    }

    pub fn modifier(&self, prop: &str) -> Option<&Value> {
        self.modifiers.get(prop)
    }

    pub fn set_modifier(&mut self, prop: impl Into<String>, value: Value) {
        self.modifiers.insert(prop.into(), value);
    }

    /// Overlays `modifiers` on top of the current ones.
    pub fn merge_modifiers(&mut self, modifiers: Map<String, Value>) {
        self.modifiers.extend(modifiers);
    }

    /// True when the spec is a plain primitive with no name and no modifiers.
    pub fn is_bare(&self) -> bool {
        self.name.is_none() && self.modifiers.is_empty()
    }

    /// Declaration form: the primitive name when bare, `{type, name?, ...modifiers}` otherwise.
    pub fn to_json(&self) -> Value {
        if self.is_bare() {
            return Value::String(self.primitive.name().to_string());
        }

        let mut object = Map::new();
        object.insert("type".into(), Value::String(self.primitive.name().to_string()));

        if let Some(name) = &self.name {
            object.insert("name".into(), Value::String(name.clone()));
        }

        for (key, value) in &self.modifiers {
            object.insert(key.clone(), value.clone());
        }

        Value::Object(object)
    }
}

impl From<Primitive> for TypeSpec {
    fn from(primitive: Primitive) -> Self {
        TypeSpec::new(primitive)
    }
}

/// Named, reusable type presets.
///
/// Lookups fall back to the built-in [`Primitive`]s when no custom type matches.
#[derive(Debug, Default)]
pub struct TypeLibrary {
    types: RwLock<BTreeMap<String, TypeSpec>>,
}

impl TypeLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a custom type. The stored spec is tagged with `name`.
    pub fn register(&self, name: impl Into<String>, spec: TypeSpec) {
        let name = name.into();
        let spec = spec.named(name.clone());

        self.types.write().insert(name, spec);
    }

    /// Registers a custom type from its JSON declaration, `{ "type": <primitive>, ...modifiers }`.
    ///
    /// The base type may itself be a previously registered custom type.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::InvalidField`] if the declaration is not an object
    /// or its `type` does not resolve.
    pub fn define(&self, name: impl Into<String>, declaration: &Value) -> DocumentStoreResult<()> {
        let name = name.into();
        let Value::Object(object) = declaration else {
            return Err(DocumentStoreError::InvalidField(format!(
                "type `{name}` must be declared as an object"
            )));
        };

        let base = object
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                DocumentStoreError::InvalidField(format!("type `{name}` must contain a `type` property"))
            })?;
        let mut spec = self
            .resolve(base)
            .ok_or_else(|| DocumentStoreError::InvalidField(format!("type `{name}` has unknown base type `{base}`")))?;

        spec.merge_modifiers(
            object
                .iter()
                .filter(|(key, _)| !matches!(key.as_str(), "type" | "name"))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        );

        self.register(name, spec);

        Ok(())
    }

    /// Resolves a declared type name: custom types first, then primitives.
    pub fn resolve(&self, type_name: &str) -> Option<TypeSpec> {
        if let Some(spec) = self.types.read().get(type_name) {
            return Some(spec.clone());
        }

        Primitive::normalize(type_name).map(TypeSpec::new)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.read().contains_key(name)
    }

    /// Names of registered custom types, sorted.
    pub fn names(&self) -> Vec<String> {
        self.types.read().keys().cloned().collect()
    }

    pub fn remove(&self, name: &str) -> Option<TypeSpec> {
        self.types.write().remove(name)
    }

    pub fn clear(&self) {
        self.types.write().clear();
    }
}
