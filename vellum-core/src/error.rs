//! Error types and result types for collection, definition and versioning operations.
//!
//! Every fallible operation in the crate returns [`DocumentStoreResult<T>`]. Definition
//! problems found while parsing declarations are aggregated into a single
//! [`DefinitionError`] so a collection author sees every violation at once.

use std::fmt;

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors that can occur when working with collections.
///
/// This enum covers serialization errors, document lifecycle issues, collection management,
/// definition and schema problems, and backend-specific errors.
#[derive(Error, Debug)]
pub enum DocumentStoreError {
    /// Serialization/deserialization error when converting between document formats (BSON, JSON).
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Error during store initialization, configuration or definition loading.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// A document with the given ID already exists in the collection.
    /// The first argument is the document ID, the second is the collection name.
    #[error("Document {0} already exists in collection {1}")]
    DocumentAlreadyExists(String, String),
    /// The requested document was not found in the collection.
    /// The first argument is the document ID, the second is the collection name.
    #[error("Document not found {0} in collection {1}")]
    DocumentNotFound(String, String),
    /// The requested collection does not exist in the store.
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),
    /// The document violates schema constraints or has invalid structure.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    /// A collection declaration failed validation.
    #[error("{0}")]
    Definition(#[from] DefinitionError),
    /// A structural mutation was attempted on a locked collection definition.
    #[error("{0}")]
    Locked(String),
    /// A field could not be constructed or added.
    #[error("{0}")]
    InvalidField(String),
    /// A hook was attached with an unknown phase or operation.
    #[error("{0}")]
    InvalidHook(String),
    /// A linked field points at a model no collection provides.
    #[error("Collection references unknown model: '{0}'")]
    UnknownModel(String),
    /// The requested version does not exist for the document.
    /// The first argument is the version ID, the second is the document ID.
    #[error("Version {0} not found for document {1}")]
    VersionNotFound(String, String),
    /// An error occurred in the underlying storage backend.
    #[error("Backend error: {0}")]
    Backend(String),
    /// An unknown error occurred.
    #[error("Unknown error: {0}")]
    Unknown(String),
}

/// A specialized `Result` type for collection operations.
pub type DocumentStoreResult<T> = Result<T, DocumentStoreError>;

impl From<BsonError> for DocumentStoreError {
    fn from(err: BsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for DocumentStoreError {
    fn from(err: SerdeJsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for DocumentStoreError {
    fn from(err: std::io::Error) -> Self {
        DocumentStoreError::Initialization(err.to_string())
    }
}

/// Aggregated validation failure for one collection declaration.
///
/// Renders as the collection name header followed by one tab-indented line per
/// violation:
///
/// ```text
/// posts collection
///     must contain the `singular` property
///     `singular` property must be of type [String]
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinitionError {
    collection: String,
    violations: Vec<String>,
}

impl DefinitionError {
    pub fn new(collection: impl Into<String>, violations: Vec<String>) -> Self {
        Self {
            collection: collection.into(),
            violations,
        }
    }

    /// Name of the collection whose declaration failed.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Every violated rule, in discovery order.
    pub fn violations(&self) -> &[String] {
        &self.violations
    }
}

impl fmt::Display for DefinitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} collection\n\t{}", self.collection, self.violations.join("\n\t"))
    }
}

impl std::error::Error for DefinitionError {}
