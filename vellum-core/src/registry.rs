//! Shared lookup tables for one application instance.
//!
//! A [`Registry`] is created by the composition root and handed to the parser, the
//! collection constructors and the factory. It holds:
//!
//! - [`LinkRegistry`]: which model each linked field points at,
//! - [`Catalog`]: which collections exist and under which model name,
//! - [`TypeLibrary`]: custom named field types.
//!
//! Collections bound through a façade also attach a [`CollectionReader`] to their
//! catalog entry, so linked reads pass through the target's own read middleware.
//!
//! Links are name based. A linked field records the *model name* it targets, and that
//! name is resolved against the catalog only when someone asks, so definitions can be
//! parsed in any order.
//!
//! ```ignore
//! let registry = Arc::new(Registry::new());
//! let posts = DefinitionParser::new(&registry).parse("posts", json)?;
//! // ... build collections, then
//! registry.clear();
//! ```

use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    fmt::Debug,
    sync::Arc,
};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::{error::DocumentStoreResult, field::FieldId, query::Query, types::TypeLibrary};

/// Reads a cataloged collection the way its own callers do, with read middleware and
/// virtual getters applied.
#[async_trait]
pub trait CollectionReader: Send + Sync + Debug {
    async fn read(&self, query: Query) -> DocumentStoreResult<Vec<bson::Document>>;
}

/// Field identity to target model name.
#[derive(Debug, Default)]
pub struct LinkRegistry {
    links: RwLock<HashMap<FieldId, String>>,
}

impl LinkRegistry {
    /// Records that `field` references `model`.
    pub fn link(&self, field: FieldId, model: impl Into<String>) {
        self.links.write().insert(field, model.into());
    }

    /// Model name linked from `field`, if any.
    pub fn target(&self, field: FieldId) -> Option<String> {
        self.links.read().get(&field).cloned()
    }

    /// Every distinct model name referenced by a link, sorted.
    pub fn targets(&self) -> BTreeSet<String> {
        self.links.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.links.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.read().is_empty()
    }

    pub fn clear(&self) {
        self.links.write().clear();
    }
}

/// One registered collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Collection name (plural, the store collection).
    pub name: String,
    /// Model name (the singular entity name links refer to).
    pub model_name: String,
}

/// Known collections, addressable by collection name or model name.
#[derive(Debug, Default)]
pub struct Catalog {
    entries: RwLock<BTreeMap<String, CatalogEntry>>,
    readers: RwLock<HashMap<String, Arc<dyn CollectionReader>>>,
}

impl Catalog {
    /// Adds or replaces the entry for `name`.
    pub fn add(&self, name: impl Into<String>, model_name: impl Into<String>) {
        let name = name.into();
        let entry = CatalogEntry {
            name: name.clone(),
            model_name: model_name.into(),
        };

        self.entries.write().insert(name, entry);
    }

    /// Routes linked reads of `name` through `reader`.
    pub fn attach_reader(&self, name: impl Into<String>, reader: Arc<dyn CollectionReader>) {
        self.readers.write().insert(name.into(), reader);
    }

    /// Reader attached to `name`, if the collection was bound through a façade.
    pub fn reader(&self, name: &str) -> Option<Arc<dyn CollectionReader>> {
        self.readers.read().get(name).cloned()
    }

    /// Removes the entry for `name` and its reader.
    pub fn remove(&self, name: &str) -> Option<CatalogEntry> {
        self.readers.write().remove(name);
        self.entries.write().remove(name)
    }

    pub fn by_name(&self, name: &str) -> Option<CatalogEntry> {
        self.entries.read().get(name).cloned()
    }

    pub fn by_model_name(&self, model_name: &str) -> Option<CatalogEntry> {
        self.entries
            .read()
            .values()
            .find(|entry| entry.model_name == model_name)
            .cloned()
    }

    /// Collection names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Model names, in collection-name order.
    pub fn model_names(&self) -> Vec<String> {
        self.entries
            .read()
            .values()
            .map(|entry| entry.model_name.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
        self.readers.write().clear();
    }
}

/// The lookup context shared by every definition and collection of an application.
#[derive(Debug, Default)]
pub struct Registry {
    links: LinkRegistry,
    catalog: Catalog,
    types: TypeLibrary,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn links(&self) -> &LinkRegistry {
        &self.links
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn types(&self) -> &TypeLibrary {
        &self.types
    }

    /// Catalog entry of the collection `field` links to.
    ///
    /// Returns `None` when the field is not linked or the target model is not registered.
    pub fn resolve_link(&self, field: FieldId) -> Option<CatalogEntry> {
        self.links
            .target(field)
            .and_then(|model| self.catalog.by_model_name(&model))
    }

    /// Link targets that no cataloged collection provides, sorted.
    pub fn unresolved_links(&self) -> Vec<String> {
        self.links
            .targets()
            .into_iter()
            .filter(|model| self.catalog.by_model_name(model).is_none())
            .collect()
    }

    /// Records the links, collections and custom types registered so far.
    pub fn checkpoint(&self) -> RegistryCheckpoint {
        RegistryCheckpoint {
            links: self.links.links.read().keys().copied().collect(),
            collections: self.catalog.names().into_iter().collect(),
            types: self.types.names().into_iter().collect(),
        }
    }

    /// Removes every link, collection and custom type registered after `checkpoint`.
    ///
    /// Entries replaced since the checkpoint keep their new value.
    pub fn rollback(&self, checkpoint: &RegistryCheckpoint) {
        self.links
            .links
            .write()
            .retain(|field, _| checkpoint.links.contains(field));

        for name in self.catalog.names() {
            if !checkpoint.collections.contains(&name) {
                self.catalog.remove(&name);
            }
        }

        for name in self.types.names() {
            if !checkpoint.types.contains(&name) {
                self.types.remove(&name);
            }
        }
    }

    /// Resets links, catalog and custom types.
    pub fn clear(&self) {
        self.links.clear();
        self.catalog.clear();
        self.types.clear();
    }
}

/// Registry contents at one point in time, see [`Registry::checkpoint`].
#[derive(Debug, Clone, Default)]
pub struct RegistryCheckpoint {
    links: HashSet<FieldId>,
    collections: BTreeSet<String>,
    types: BTreeSet<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Primitive, TypeSpec};

    #[test]
    fn links_resolve_through_the_catalog() {
        let registry = Registry::new();
        let field = FieldId::next();

        registry.links().link(field, "User");
        assert_eq!(registry.resolve_link(field), None);
        assert_eq!(registry.unresolved_links(), vec!["User".to_string()]);

        registry.catalog().add("users", "User");
        assert_eq!(
            registry.resolve_link(field),
            Some(CatalogEntry { name: "users".into(), model_name: "User".into() })
        );
        assert!(registry.unresolved_links().is_empty());
    }

    #[test]
    fn unlinked_fields_resolve_to_nothing() {
        let registry = Registry::new();
        registry.catalog().add("users", "User");

        assert_eq!(registry.resolve_link(FieldId::next()), None);
    }

    #[test]
    fn catalog_lookups_by_either_name() {
        let catalog = Catalog::default();
        catalog.add("posts", "Post");
        catalog.add("authors", "Author");

        assert_eq!(catalog.names(), vec!["authors", "posts"]);
        assert_eq!(catalog.model_names(), vec!["Author", "Post"]);
        assert_eq!(catalog.by_model_name("Post").map(|e| e.name), Some("posts".into()));
        assert_eq!(catalog.by_name("authors").map(|e| e.model_name), Some("Author".into()));
        assert_eq!(catalog.by_name("comments"), None);
    }

    #[test]
    fn rollback_forgets_what_came_after_the_checkpoint() {
        let registry = Registry::new();
        let kept = FieldId::next();
        registry.links().link(kept, "User");
        registry.catalog().add("users", "User");
        registry.types().register("Email", TypeSpec::new(Primitive::String));

        let checkpoint = registry.checkpoint();

        let added = FieldId::next();
        registry.links().link(added, "Tag");
        registry.catalog().add("tags", "Tag");
        registry.types().register("Slug", TypeSpec::new(Primitive::String));

        registry.rollback(&checkpoint);

        assert_eq!(registry.links().target(kept), Some("User".into()));
        assert_eq!(registry.links().target(added), None);
        assert_eq!(registry.catalog().names(), vec!["users"]);
        assert_eq!(registry.types().names(), vec!["Email"]);
    }

    #[test]
    fn clear_resets_everything() {
        let registry = Registry::new();
        registry.links().link(FieldId::next(), "User");
        registry.catalog().add("users", "User");

        registry.clear();

        assert!(registry.links().is_empty());
        assert!(registry.catalog().is_empty());
    }
}
