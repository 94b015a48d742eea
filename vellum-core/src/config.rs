//! Runtime configuration of a collection factory.
//!
//! ```json
//! {
//!   "collections": "schemas/collections",
//!   "types": "schemas/types",
//!   "versionsCollection": "history",
//!   "defaultPermissions": { "read": "*", "write": ["admin"] }
//! }
//! ```
//!
//! Every key is optional; missing keys take their [`Default`] value.

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
    error::DocumentStoreResult,
    permission::Permissions,
    version::VERSIONS_COLLECTION,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Directory of collection declarations, one JSON file per collection.
    pub collections: PathBuf,
    /// Directory of custom type declarations.
    pub types: Option<PathBuf>,
    /// Store collection holding version records.
    pub versions_collection: String,
    /// Permissions of declarations without a `permissions` property.
    pub default_permissions: Permissions,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            collections: PathBuf::from("collections"),
            types: None,
            versions_collection: VERSIONS_COLLECTION.to_string(),
            default_permissions: Permissions::default(),
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    pub fn from_json_str(json: &str) -> DocumentStoreResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads a JSON configuration file.
    ///
    /// Relative `collections` and `types` directories are resolved against the
    /// directory containing the file.
    pub fn from_file(path: impl AsRef<Path>) -> DocumentStoreResult<Self> {
        let path = path.as_ref();
        let mut config = Self::from_json_str(&fs::read_to_string(path)?)?;

        if let Some(base) = path.parent() {
            if config.collections.is_relative() {
                config.collections = base.join(&config.collections);
            }
            if let Some(types) = config.types.as_mut().filter(|types| types.is_relative()) {
                *types = base.join(&*types);
            }
        }

        Ok(config)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn collections(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.collections = dir.into();
        self
    }

    pub fn types(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.types = Some(dir.into());
        self
    }

    pub fn versions_collection(mut self, name: impl Into<String>) -> Self {
        self.config.versions_collection = name.into();
        self
    }

    pub fn default_permissions(mut self, permissions: Permissions) -> Self {
        self.config.default_permissions = permissions;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::Permission;
    use pretty_assertions::assert_eq;

    #[test]
    fn missing_keys_take_defaults() {
        let config = Config::from_json_str(r#"{ "versionsCollection": "history" }"#).unwrap();

        assert_eq!(config.collections, PathBuf::from("collections"));
        assert_eq!(config.types, None);
        assert_eq!(config.versions_collection, "history");
        assert_eq!(config.default_permissions, Permissions::default());
    }

    #[test]
    fn parses_default_permissions() {
        let config = Config::from_json_str(
            r#"{ "defaultPermissions": { "read": "*", "write": ["admin", "editor"] } }"#,
        )
        .unwrap();

        assert!(config.default_permissions.can_read("anyone"));
        assert!(config.default_permissions.can_write("editor"));
        assert!(!config.default_permissions.can_write("anyone"));
    }

    #[test]
    fn builder_overrides_defaults() {
        let config = Config::builder()
            .collections("schemas")
            .types("types")
            .versions_collection("history")
            .default_permissions(Permissions::new(Permission::Any, Permission::allow(["admin"])))
            .build();

        assert_eq!(config.collections, PathBuf::from("schemas"));
        assert_eq!(config.types, Some(PathBuf::from("types")));
        assert_eq!(config.versions_collection, "history");
    }

    #[test]
    fn malformed_json_is_a_serialization_error() {
        assert!(matches!(
            Config::from_json_str("{ nope"),
            Err(crate::error::DocumentStoreError::Serialization(_))
        ));
    }
}
