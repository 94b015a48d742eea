//! Declaration parsing.
//!
//! A declaration is plain JSON as written by a collection author:
//!
//! ```json
//! {
//!   "singular": "Post",
//!   "fields": {
//!     "title":  { "label": "Title",  "schemaType": "String" },
//!     "author": { "label": "Author", "schemaType": { "ref": "User", "display": "name" } },
//!     "tags":   { "label": "Tags",   "schemaType": ["String"] },
//!     "body":   { "label": "Body",   "schemaType": {
//!       "intro": { "label": "Intro", "schemaType": { "type": "String", "required": true } }
//!     } }
//!   },
//!   "meta": { "icon": "post" },
//!   "versioned": true,
//!   "defaultField": "title",
//!   "permissions": { "read": "*", "write": ["admin"] }
//! }
//! ```
//!
//! A `schemaType` is one of:
//!
//! - a type name string,
//! - an object with a `type` and/or `ref` key (a scalar or linked field; extra keys are
//!   type modifiers),
//! - any other object (a nested group whose keys are child field declarations),
//! - a one-element array of either (a multi-value field).
//!
//! Validation runs over the whole declaration before anything is built, and every
//! violation is reported at once in a single [`DefinitionError`].

use serde_json::{Map, Value};

use crate::{
    definition::{CollectionDefinition, VirtualAccessor},
    document::ID_FIELD,
    error::{DefinitionError, DocumentStoreError, DocumentStoreResult},
    field::{FieldDefinition, FieldSpec, Reference},
    model::{VirtualGetter, VirtualSetter},
    permission::{DeclaredPermissions, Permissions},
    registry::Registry,
    types::{Primitive, TypeSpec},
};

const KNOWN_KEYS: [&str; 7] = [
    "singular",
    "fields",
    "meta",
    "virtuals",
    "versioned",
    "defaultField",
    "permissions",
];

/// A JSON declaration plus the virtual accessors JSON cannot carry.
#[derive(Debug, Clone, Default)]
pub struct Declaration {
    json: Value,
    virtuals: Vec<(String, VirtualAccessor)>,
}

impl Declaration {
    pub fn new(json: Value) -> Self {
        Self { json, virtuals: Vec::new() }
    }

    pub fn json(&self) -> &Value {
        &self.json
    }

    pub fn with_getter(mut self, path: impl Into<String>, getter: VirtualGetter) -> Self {
        self.virtuals.push((path.into(), VirtualAccessor::Get(getter)));
        self
    }

    pub fn with_setter(mut self, path: impl Into<String>, setter: VirtualSetter) -> Self {
        self.virtuals.push((path.into(), VirtualAccessor::Set(setter)));
        self
    }
}

impl From<Value> for Declaration {
    fn from(json: Value) -> Self {
        Declaration::new(json)
    }
}

/// Builds [`CollectionDefinition`]s from declarations against a [`Registry`].
///
/// Linked fields are recorded in the registry's link table and custom type names are
/// resolved through its type library.
#[derive(Debug, Clone)]
pub struct DefinitionParser<'a> {
    registry: &'a Registry,
    default_permissions: Permissions,
}

impl<'a> DefinitionParser<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self {
            registry,
            default_permissions: Permissions::default(),
        }
    }

    /// Permissions given to declarations that do not declare their own.
    pub fn with_default_permissions(mut self, permissions: Permissions) -> Self {
        self.default_permissions = permissions;
        self
    }

    /// Validates `declaration` and builds the unlocked definition of collection `name`.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Definition`] listing every violation found.
    pub fn parse(&self, name: &str, declaration: impl Into<Declaration>) -> DocumentStoreResult<CollectionDefinition> {
        let declaration = declaration.into();
        let empty = Map::new();
        let json = declaration.json.as_object().unwrap_or(&empty);

        let mut violations = self.validate(json);
        if let Some(Value::Object(fields)) = json.get("fields") {
            self.validate_fields("", fields, &mut violations);
        }

        if !violations.is_empty() {
            return Err(DefinitionError::new(name, violations).into());
        }

        let unknown: Vec<&str> = json
            .keys()
            .map(String::as_str)
            .filter(|key| !KNOWN_KEYS.contains(key))
            .collect();
        if !unknown.is_empty() {
            tracing::warn!(collection = name, keys = ?unknown, "declaration has unknown properties");
        }

        let singular = json.get("singular").and_then(Value::as_str).unwrap_or_default();
        let mut definition = CollectionDefinition::new(name, singular);

        if let Some(Value::Object(fields)) = json.get("fields") {
            for (field_name, field) in fields {
                let field = self
                    .build_field(field_name, field)
                    .map_err(|err| DefinitionError::new(name, vec![err.to_string()]))?;
                definition.add_field(field)?;
            }
        }

        for (path, accessor) in declaration.virtuals {
            definition.add_virtual(path, accessor)?;
        }

        if let Some(Value::Object(meta)) = json.get("meta") {
            for (prop, value) in meta {
                definition.set_meta(prop.clone(), value.clone());
            }
        }

        if json.get("versioned") == Some(&Value::Bool(false)) {
            definition.set_versioned(false);
        }

        if let Some(default_field) = json.get("defaultField").and_then(Value::as_str) {
            if default_field != ID_FIELD && definition.field(default_field).is_none() {
                tracing::warn!(
                    collection = name,
                    default_field,
                    "defaultField does not name a declared field"
                );
            }

            definition.set_default_field(default_field);
        }

        let permissions = match json.get("permissions") {
            Some(permissions) => serde_json::from_value::<DeclaredPermissions>(permissions.clone())
                .map_err(|err| DefinitionError::new(name, vec![format!("`permissions` property is invalid: {err}")]))?
                .or_defaults(&self.default_permissions),
            None => self.default_permissions.clone(),
        };
        definition.set_permissions(permissions);

        Ok(definition)
    }

    fn validate(&self, json: &Map<String, Value>) -> Vec<String> {
        let mut violations = Vec::new();

        require(json, "singular", &["String"], Value::is_string, "", &mut violations);
        require(json, "fields", &["PlainObject"], Value::is_object, "", &mut violations);

        if json.get("meta").is_some_and(|meta| !meta.is_object()) {
            violations.push("`meta` property must be of type [PlainObject]".to_string());
        }

        if json.get("versioned").is_some_and(|versioned| !versioned.is_boolean()) {
            violations.push("`versioned` property must be of type [Boolean]".to_string());
        }

        if json.get("defaultField").is_some_and(|field| !field.is_string()) {
            violations.push("`defaultField` property must be of type [String]".to_string());
        }

        match json.get("permissions") {
            None => {}
            Some(Value::Object(permissions)) => {
                for access in ["read", "write"] {
                    if permissions.get(access).is_some_and(|value| !is_identity_list(value)) {
                        violations.push(format!("`permissions.{access}` property must be of type [String,Array]"));
                    }
                }
            }
            Some(_) => violations.push("`permissions` property must be of type [PlainObject]".to_string()),
        }

        violations
    }

    fn validate_fields(&self, prefix: &str, fields: &Map<String, Value>, violations: &mut Vec<String>) {
        for (key, field) in fields {
            let path = if prefix.is_empty() { key.clone() } else { format!("{prefix}.{key}") };
            let empty = Map::new();
            let object = field.as_object().unwrap_or(&empty);
            let field_prefix = format!("`{path}` field ");

            require(object, "label", &["String"], Value::is_string, &field_prefix, violations);
            require(
                object,
                "schemaType",
                &["Array", "Object"],
                |value| value.is_array() || value.is_object() || value.is_string(),
                &field_prefix,
                violations,
            );

            if let Some(schema_type) = object.get("schemaType") {
                self.validate_schema_type(&path, schema_type, false, violations);
            }
        }
    }

    fn validate_schema_type(&self, path: &str, schema_type: &Value, in_array: bool, violations: &mut Vec<String>) {
        match schema_type {
            Value::String(type_name) => self.validate_type_name(path, type_name, violations),
            Value::Array(_) if in_array => {
                violations.push(format!("`{path}` field cannot nest multi-value types"));
            }
            Value::Array(elements) => match elements.as_slice() {
                [element] => self.validate_schema_type(path, element, true, violations),
                _ => violations.push(format!("`{path}` field `schemaType` array must contain exactly one element")),
            },
            Value::Object(object) if is_scalar(object) => {
                match object.get("type") {
                    None => {}
                    Some(Value::String(type_name)) => self.validate_type_name(path, type_name, violations),
                    Some(_) => violations.push(format!("`{path}` field `type` property must be of type [String]")),
                }

                for prop in ["ref", "display", "name"] {
                    if object.get(prop).is_some_and(|value| !value.is_string()) {
                        violations.push(format!("`{path}` field `{prop}` property must be of type [String]"));
                    }
                }
            }
            Value::Object(children) => self.validate_fields(path, children, violations),
            _ if in_array => {
                violations.push(format!("`{path}` field `schemaType` element must be of type [String,Object]"));
            }
            _ => {}
        }
    }

    fn validate_type_name(&self, path: &str, type_name: &str, violations: &mut Vec<String>) {
        if self.registry.types().resolve(type_name).is_none() {
            violations.push(format!("`{path}` field has unknown type `{type_name}`"));
        }
    }

    /// Builds one field, children first.
    fn build_field(&self, name: &str, declaration: &Value) -> DocumentStoreResult<FieldDefinition> {
        let label = declaration.get("label").and_then(Value::as_str);
        let spec = match declaration.get("schemaType") {
            Some(schema_type) => self.field_spec(schema_type)?,
            None => Primitive::String.into(),
        };

        FieldDefinition::new(name, label, Some(spec), self.registry.links())
    }

    fn field_spec(&self, schema_type: &Value) -> DocumentStoreResult<FieldSpec> {
        match schema_type {
            Value::String(type_name) => Ok(FieldSpec::Scalar(self.resolve_type(type_name)?)),
            Value::Array(elements) => match elements.as_slice() {
                [element] => Ok(self.field_spec(element)?.many()),
                _ => Err(DocumentStoreError::InvalidField(
                    "multi-value `schemaType` must contain exactly one element".to_string(),
                )),
            },
            Value::Object(object) if is_scalar(object) => self.scalar_spec(object),
            Value::Object(children) => children
                .iter()
                .map(|(name, child)| self.build_field(name, child))
                .collect::<DocumentStoreResult<Vec<_>>>()
                .map(FieldSpec::group),
            other => Err(DocumentStoreError::InvalidField(format!("unsupported `schemaType` {other}"))),
        }
    }

    fn scalar_spec(&self, object: &Map<String, Value>) -> DocumentStoreResult<FieldSpec> {
        let mut spec = match object.get("type").and_then(Value::as_str) {
            Some(type_name) => self.resolve_type(type_name)?,
            None => TypeSpec::new(Primitive::Uuid),
        };

        if let Some(name) = object.get("name").and_then(Value::as_str) {
            spec = spec.named(name);
        }

        spec.merge_modifiers(
            object
                .iter()
                .filter(|(key, _)| !matches!(key.as_str(), "type" | "name" | "ref" | "display"))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        );

        Ok(match object.get("ref").and_then(Value::as_str) {
            Some(model) => FieldSpec::Linked {
                spec,
                reference: Reference::Model(model.to_string()),
                display: object
                    .get("display")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            },
            None => FieldSpec::Scalar(spec),
        })
    }

    fn resolve_type(&self, type_name: &str) -> DocumentStoreResult<TypeSpec> {
        self.registry
            .types()
            .resolve(type_name)
            .ok_or_else(|| DocumentStoreError::InvalidField(format!("unknown type `{type_name}`")))
    }
}

/// An object spec is a scalar (or link) when it names a `type` or a `ref`.
fn is_scalar(object: &Map<String, Value>) -> bool {
    object.contains_key("type") || object.contains_key("ref")
}

fn is_identity_list(value: &Value) -> bool {
    match value {
        Value::String(_) => true,
        Value::Array(items) => items.iter().all(Value::is_string),
        _ => false,
    }
}

/// Records a violation when `prop` is missing and another when it has the wrong type.
/// A missing property reports both.
fn require(
    object: &Map<String, Value>,
    prop: &str,
    types: &[&str],
    check: impl Fn(&Value) -> bool,
    prefix: &str,
    violations: &mut Vec<String>,
) {
    let value = object.get(prop);

    if value.is_none() {
        violations.push(if prefix.is_empty() {
            format!("must contain the `{prop}` property")
        } else {
            format!("{prefix}must contain `{prop}` property")
        });
    }

    if !value.is_some_and(check) {
        violations.push(format!("{prefix}`{prop}` property must be of type [{}]", types.join(",")));
    }
}
