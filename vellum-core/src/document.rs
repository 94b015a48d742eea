//! Core traits and types for document representation and serialization.
//!
//! Two document shapes flow through the crate:
//!
//! - Types implementing [`Document`] are strongly typed records with a fixed collection,
//!   such as the version log entries kept by [`crate::version`].
//! - [`Record`] is the untyped shape used by definition-driven collections: a BSON body
//!   that always carries its identity under [`ID_FIELD`].

use bson::{
    Binary, Bson, Uuid, de::deserialize_from_bson, ser::serialize_to_bson, spec::BinarySubtype,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, from_value, to_value};

use crate::error::{DocumentStoreError, DocumentStoreResult};

/// Key under which every stored record keeps its identity.
pub const ID_FIELD: &str = "_id";

/// Core trait that all typed documents stored in a collection must implement.
///
/// Every document must have a unique identifier (UUID) and specify which collection it
/// belongs to by default.
///
/// # Example
///
/// ```ignore
/// use vellum::document::Document;
/// use bson::Uuid;
/// use serde::{Serialize, Deserialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// pub struct AuditEntry {
///     pub id: Uuid,
///     pub message: String,
/// }
///
/// impl Document for AuditEntry {
///     fn id(&self) -> &Uuid {
///         &self.id
///     }
///
///     fn collection_name() -> &'static str {
///         "audit"
///     }
/// }
/// ```
pub trait Document: Serialize + for<'de> Deserialize<'de> + Send + Sync + Clone + 'static {
    /// Returns a reference to this document's unique identifier.
    fn id(&self) -> &Uuid;

    /// Returns the default name of the collection this document belongs to.
    fn collection_name() -> &'static str;
}

/// Extension trait providing serialization/deserialization utilities for documents.
///
/// This trait is automatically implemented for all types that implement [`Document`].
pub trait DocumentExt: Document {
    /// Converts this document to a BSON value for storage.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    fn to_bson(&self) -> DocumentStoreResult<Bson>;

    /// Creates a document from a BSON value.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails or the structure is invalid.
    fn from_bson(bson: Bson) -> DocumentStoreResult<Self>;

    /// Converts this document to a JSON value.
    fn to_json(&self) -> DocumentStoreResult<Value>;

    /// Creates a document from a JSON value.
    fn from_json(value: Value) -> DocumentStoreResult<Self>;
}

impl<D: Document> DocumentExt for D {
    fn to_bson(&self) -> DocumentStoreResult<Bson> {
        Ok(serialize_to_bson(self)?)
    }

    fn from_bson(bson: Bson) -> DocumentStoreResult<Self> {
        Ok(deserialize_from_bson(bson)?)
    }

    fn to_json(&self) -> DocumentStoreResult<Value> {
        Ok(to_value(self)?)
    }

    fn from_json(value: Value) -> DocumentStoreResult<Self> {
        Ok(from_value(value)?)
    }
}

/// An untyped stored document: a BSON body plus its identity.
///
/// The identity is mirrored into the body under [`ID_FIELD`] so that the body alone is
/// what the store sees, queries and returns.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    id: Uuid,
    body: bson::Document,
}

impl Record {
    /// Wraps a body, keeping an existing `_id` or assigning a fresh one.
    pub fn new(mut body: bson::Document) -> Self {
        let id = body
            .get(ID_FIELD)
            .and_then(uuid_from_bson)
            .unwrap_or_else(Uuid::new);

        body.insert(ID_FIELD, id);

        Self { id, body }
    }

    /// Wraps a body under the given identity, overriding any `_id` it carries.
    pub fn with_id(id: Uuid, mut body: bson::Document) -> Self {
        body.insert(ID_FIELD, id);

        Self { id, body }
    }

    pub fn id(&self) -> &Uuid {
        &self.id
    }

    pub fn body(&self) -> &bson::Document {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut bson::Document {
        &mut self.body
    }

    pub fn into_body(self) -> bson::Document {
        self.body
    }

    /// Looks up a value by dot path (`address.city`).
    pub fn get(&self, path: &str) -> Option<&Bson> {
        lookup_path(&self.body, path)
    }

    /// Reads a record back from a stored BSON value.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::InvalidDocument`] if the value is not a document or
    /// carries no usable `_id`.
    pub fn from_bson(bson: Bson) -> DocumentStoreResult<Self> {
        let Bson::Document(body) = bson else {
            return Err(DocumentStoreError::InvalidDocument(
                "stored value is not a document".to_string(),
            ));
        };

        let id = body
            .get(ID_FIELD)
            .and_then(uuid_from_bson)
            .ok_or_else(|| {
                DocumentStoreError::InvalidDocument(format!("document has no `{ID_FIELD}`"))
            })?;

        Ok(Self { id, body })
    }

    pub fn to_bson(&self) -> Bson {
        Bson::Document(self.body.clone())
    }

    pub fn into_pair(self) -> (Uuid, Bson) {
        (self.id, Bson::Document(self.body))
    }
}

impl From<bson::Document> for Record {
    fn from(body: bson::Document) -> Self {
        Record::new(body)
    }
}

/// Extracts a UUID from its binary or string encodings.
pub fn uuid_from_bson(value: &Bson) -> Option<Uuid> {
    match value {
        Bson::Binary(Binary { subtype: BinarySubtype::Uuid, bytes }) => {
            <[u8; 16]>::try_from(bytes.as_slice())
                .ok()
                .map(Uuid::from_bytes)
        }
        Bson::String(value) => Uuid::parse_str(value).ok(),
        _ => None,
    }
}

/// Resolves a dot-separated path through nested documents.
///
/// Numeric segments index into arrays, so `tags.0` reads the first tag.
pub fn lookup_path<'a>(document: &'a bson::Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;

    for segment in segments {
        current = match current {
            Bson::Document(inner) => inner.get(segment)?,
            Bson::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}
