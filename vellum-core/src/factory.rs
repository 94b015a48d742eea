//! Builds every collection of an application from its declarations.
//!
//! ```ignore
//! let factory = CollectionFactory::builder(store.clone())
//!     .config(Config::from_file("vellum.json")?)
//!     .load_definitions()
//!     .declaration("audit", Declaration::new(audit_json).with_getter("summary", summary))
//!     .build()?;
//!
//! factory.register_all().await?;
//! let posts = factory.collection("posts").unwrap();
//! ```

use std::{collections::BTreeMap, sync::Arc};

use futures::future::try_join_all;

use crate::{
    backend::StoreBackend,
    collection::Collection,
    config::Config,
    error::{DocumentStoreError, DocumentStoreResult},
    loader::{DefinitionLoader, TypeLoader},
    parser::{Declaration, DefinitionParser},
    registry::Registry,
    version::VersionControl,
};

/// The collections of an application, keyed by collection name.
#[derive(Debug)]
pub struct CollectionFactory<B: StoreBackend> {
    backend: B,
    registry: Arc<Registry>,
    config: Config,
    versions: VersionControl<B>,
    collections: BTreeMap<String, Collection<B>>,
}

impl<B> CollectionFactory<B>
where
    B: StoreBackend + Clone + 'static,
{
    pub fn builder(backend: B) -> CollectionFactoryBuilder<B> {
        CollectionFactoryBuilder::new(backend)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The version log shared by every versioned collection.
    pub fn versions(&self) -> &VersionControl<B> {
        &self.versions
    }

    pub fn collection(&self, name: &str) -> Option<&Collection<B>> {
        self.collections.get(name)
    }

    pub fn collection_with_model(&self, model_name: &str) -> Option<&Collection<B>> {
        self.collections
            .values()
            .find(|collection| collection.model_name() == model_name)
    }

    /// Every collection, ordered by name.
    pub fn collections(&self) -> impl Iterator<Item = &Collection<B>> {
        self.collections.values()
    }

    pub fn len(&self) -> usize {
        self.collections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }

    /// Creates the versions collection and registers every collection with the store.
    pub async fn register_all(&self) -> DocumentStoreResult<()> {
        self.backend
            .create_collection(self.versions.collection())
            .await?;

        try_join_all(self.collections.values().map(|collection| collection.register())).await?;

        Ok(())
    }
}

pub struct CollectionFactoryBuilder<B: StoreBackend> {
    backend: B,
    registry: Option<Arc<Registry>>,
    config: Config,
    declarations: BTreeMap<String, Declaration>,
    load_definitions: bool,
}

impl<B> CollectionFactoryBuilder<B>
where
    B: StoreBackend + Clone + 'static,
{
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            registry: None,
            config: Config::default(),
            declarations: BTreeMap::new(),
            load_definitions: false,
        }
    }

    /// Shares an existing registry instead of creating a fresh one.
    pub fn registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Adds a declaration. It replaces a loaded declaration of the same name.
    pub fn declaration(mut self, name: impl Into<String>, declaration: impl Into<Declaration>) -> Self {
        self.declarations.insert(name.into(), declaration.into());
        self
    }

    pub fn declarations<I, N, D>(mut self, declarations: I) -> Self
    where
        I: IntoIterator<Item = (N, D)>,
        N: Into<String>,
        D: Into<Declaration>,
    {
        self.declarations.extend(
            declarations
                .into_iter()
                .map(|(name, declaration)| (name.into(), declaration.into())),
        );
        self
    }

    /// Also reads the declarations in the configured `collections` directory.
    pub fn load_definitions(mut self) -> Self {
        self.load_definitions = true;
        self
    }

    /// Loads custom types, parses every declaration and builds its collection.
    ///
    /// # Errors
    ///
    /// Fails on the first declaration that does not parse, or with
    /// [`DocumentStoreError::UnknownModel`] when a linked field names a model no
    /// collection provides. A failed build removes the types, links and collections it
    /// registered from the registry.
    pub fn build(mut self) -> DocumentStoreResult<CollectionFactory<B>> {
        let registry = self.registry.take().unwrap_or_default();
        let checkpoint = registry.checkpoint();

        self.assemble(registry.clone()).inspect_err(|err| {
            tracing::debug!(error = %err, "collection build failed, rolling back registry");
            registry.rollback(&checkpoint);
        })
    }

    fn assemble(self, registry: Arc<Registry>) -> DocumentStoreResult<CollectionFactory<B>> {
        let Self {
            backend,
            config,
            mut declarations,
            load_definitions,
            ..
        } = self;

        if let Some(dir) = &config.types {
            let types = TypeLoader::new(dir).load_into(registry.types())?;
            tracing::debug!(count = types.len(), dir = %dir.display(), "loaded custom types");
        }

        if load_definitions {
            for (name, json) in DefinitionLoader::new(&config.collections).load()? {
                declarations
                    .entry(name)
                    .or_insert_with(|| Declaration::new(json));
            }
        }

        let parser = DefinitionParser::new(&registry).with_default_permissions(config.default_permissions.clone());
        let versions = VersionControl::with_collection(config.versions_collection.clone(), backend.clone());

        let mut collections = BTreeMap::new();
        for (name, declaration) in declarations {
            let definition = parser.parse(&name, declaration)?;
            let collection =
                Collection::with_versions(definition, backend.clone(), registry.clone(), versions.clone())?;

            collections.insert(name, collection);
        }

        if let Some(model) = registry.unresolved_links().into_iter().next() {
            return Err(DocumentStoreError::UnknownModel(model));
        }

        tracing::info!(
            collections = collections.len(),
            versions = %versions.collection(),
            "built collections"
        );

        Ok(CollectionFactory {
            backend,
            registry,
            config,
            versions,
            collections,
        })
    }
}
